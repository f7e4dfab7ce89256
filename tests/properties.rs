//! Controller-level checks for the universal invariants named in the
//! component's testable properties (quota conservation, generation
//! monotonicity, atomic failure, no orphan nodes).

mod common;

use memfs_core::{Error, Filesystem, OpenMode};

#[test]
fn quota_used_matches_sum_of_file_usage() {
    let fs = common::fs_with_quota(1_000_000);
    common::write_file(&fs, "/a.txt", b"0123456789");
    fs.mkdir("/dir", false).unwrap();
    common::write_file(&fs, "/dir/b.txt", b"short");
    common::write_file(&fs, "/dir/c.txt", b"");

    let reported = fs.stat("/a.txt").unwrap().size + fs.stat("/dir/b.txt").unwrap().size;
    let (_, used, _) = fs.quota_snapshot();
    // used includes per-chunk bookkeeping overhead on top of raw payload
    // bytes, so it is >= the sum of reported sizes, not strictly equal.
    assert!(used >= reported);

    fs.remove("/a.txt").unwrap();
    fs.remove("/dir/b.txt").unwrap();
    fs.remove("/dir/c.txt").unwrap();
    assert_eq!(fs.quota_snapshot().1, 0);
}

#[test]
fn generation_never_decreases() {
    let fs = Filesystem::new();
    let mut handle = fs.open("/f", OpenMode::WriteTruncate, 0, None).unwrap();
    let mut last_gen = 0u64;
    for chunk in [b"a".as_slice(), b"bb".as_slice(), b"ccc".as_slice()] {
        handle.write(chunk).unwrap();
        let gen = fs.stat("/f").unwrap().generation;
        assert!(gen >= last_gen);
        last_gen = gen;
    }
    handle.truncate(Some(1)).unwrap();
    assert!(fs.stat("/f").unwrap().generation >= last_gen);
}

#[test]
fn failed_mkdir_leaves_tree_unchanged() {
    let fs = Filesystem::new();
    fs.mkdir("/a", false).unwrap();
    let before = fs.listdir("/").unwrap();
    assert!(matches!(fs.mkdir("/a", false), Err(Error::AlreadyExists(_))));
    assert_eq!(fs.listdir("/").unwrap(), before);
}

#[test]
fn failed_import_tree_creates_no_nodes() {
    let fs = common::fs_with_quota(10);
    let mut tree = std::collections::HashMap::new();
    tree.insert("/a.bin".to_string(), vec![0u8; 5]);
    tree.insert("/dir/b.bin".to_string(), vec![0u8; 100]);
    assert!(fs.import_tree(&tree).is_err());
    assert!(!fs.exists("/a.bin"));
    assert!(!fs.exists("/dir"));
    assert_eq!(fs.quota_snapshot().1, 0);
}

#[test]
fn failed_copy_leaves_no_partial_destination() {
    let fs = common::fs_with_quota(10);
    common::write_file(&fs, "/src.bin", &vec![0u8; 10]);
    // Quota is now exhausted; copying elsewhere must fail without leaving an
    // empty destination file behind.
    let err = fs.copy("/src.bin", "/dst.bin").unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));
    assert!(!fs.exists("/dst.bin"));
}

#[test]
fn truncation_size_law() {
    let fs = Filesystem::new();
    common::write_file(&fs, "/f", b"0123456789");
    let mut handle = fs.open("/f", OpenMode::ReadWrite, 0, None).unwrap();
    handle.truncate(Some(4)).unwrap();
    handle.close();
    assert_eq!(common::read_file(&fs, "/f"), b"0123");

    let mut handle = fs.open("/f", OpenMode::ReadWrite, 0, None).unwrap();
    handle.truncate(Some(8)).unwrap();
    handle.close();
    let data = common::read_file(&fs, "/f");
    assert_eq!(&data[..4], b"0123");
    assert_eq!(&data[4..], &[0, 0, 0, 0]);
}

#[test]
fn zero_quota_rejects_any_nonzero_write() {
    let fs = common::fs_with_quota(0);
    let mut handle = fs.open("/f", OpenMode::WriteTruncate, 0, None).unwrap();
    let err = handle.write(b"x").unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));
}

#[test]
fn max_nodes_reached_rejects_new_nodes_but_root_counts() {
    let fs = Filesystem::with_config(memfs_core::Config::builder().max_nodes(2).build()).unwrap();
    fs.mkdir("/a", false).unwrap();
    let err = fs.mkdir("/b", false).unwrap_err();
    assert!(matches!(err, Error::NodeLimitExceeded { .. }));
}
