//! The seven end-to-end scenarios named in the component's testable
//! properties: a representative walk through realistic usage rather than a
//! property grid.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use memfs_core::{Config, DefaultStorage, Error, Filesystem, OpenMode};

#[test]
fn snapshot_roundtrip() {
    let fs = Filesystem::new();
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    common::write_file(&fs, "/snap.db", &payload);

    let exported = fs.export_tree("/", false).unwrap();
    let map: HashMap<String, Vec<u8>> = exported.into_iter().collect();
    assert_eq!(map.get("/snap.db").unwrap(), &payload);

    let fresh = Filesystem::new();
    fresh.import_tree(&map).unwrap();
    assert_eq!(common::read_file(&fresh, "/snap.db"), payload);
}

#[test]
fn promotion_under_stress() {
    let fs = common::fs_with_quota(1024 * 1024);
    let mut handle = fs.open("/big.bin", OpenMode::WriteTruncate, 0, None).unwrap();
    for _ in 0..8 {
        handle.write(&vec![0u8; 64 * 1024]).unwrap();
    }
    handle.close();

    let mut handle = fs.open("/big.bin", OpenMode::ReadWrite, 0, None).unwrap();
    handle.seek(memfs_core::SeekFrom::Start(256 * 1024)).unwrap();
    handle.write(&vec![0xAAu8; 64 * 1024]).unwrap();
    handle.close();

    let data = {
        let mut handle = fs.open("/big.bin", OpenMode::Read, 0, None).unwrap();
        let d = handle.read(None).unwrap();
        handle.close();
        d
    };
    assert_eq!(data.len(), 512 * 1024);
    assert!(data[..256 * 1024].iter().all(|&b| b == 0));
    assert!(data[256 * 1024..320 * 1024].iter().all(|&b| b == 0xAA));
    assert!(data[320 * 1024..].iter().all(|&b| b == 0));
    assert_eq!(fs.quota_snapshot().1, 512 * 1024);
}

#[test]
fn rollback_preserves_quota_and_tree() {
    let fs = common::fs_with_quota(500);
    common::write_file(&fs, "/existing.bin", &vec![0u8; 200]);
    let used_before = fs.quota_snapshot().1;

    let mut tree = HashMap::new();
    tree.insert("/big.bin".to_string(), vec![0u8; 1000]);
    let err = fs.import_tree(&tree).unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));

    assert_eq!(fs.quota_snapshot().1, used_before);
    assert!(!fs.exists("/big.bin"));
    assert_eq!(common::read_file(&fs, "/existing.bin"), vec![0u8; 200]);
}

#[test]
fn concurrent_small_file_writes() {
    let fs = Arc::new(common::fs_with_quota(64 * 1024 * 1024));
    let mut handles = Vec::new();
    for t in 0..50 {
        let fs = Arc::clone(&fs);
        handles.push(thread::spawn(move || {
            let path = format!("/thread-{t}.bin");
            let payload = vec![t as u8; 64];
            for _ in 0..1000 {
                {
                    let mut h = fs.open(&path, OpenMode::WriteTruncate, 0, None).unwrap();
                    h.write(&payload).unwrap();
                    h.close();
                }
                let mut h = fs.open(&path, OpenMode::Read, 0, None).unwrap();
                let data = h.read(None).unwrap();
                h.close();
                assert_eq!(data, payload);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn append_vs_seek_ignores_seek_for_write_position() {
    let fs = Filesystem::new();
    let mut handle = fs.open("/f", OpenMode::Append, 0, None).unwrap();
    handle.write(b"hello").unwrap();
    handle.seek(memfs_core::SeekFrom::Start(0)).unwrap();
    handle.write(b" world").unwrap();
    handle.close();
    assert_eq!(common::read_file(&fs, "/f"), b"hello world");
}

#[test]
fn glob_with_double_star_returns_all_matches_sorted() {
    let fs = Filesystem::new();
    fs.mkdir("/a/b/c", false).unwrap();
    common::write_file(&fs, "/a/x.bin", b"1");
    common::write_file(&fs, "/a/b/y.bin", b"2");
    common::write_file(&fs, "/a/b/c/z.bin", b"3");
    assert_eq!(
        fs.glob("/a/**/*.bin"),
        vec![
            "/a/b/c/z.bin".to_string(),
            "/a/b/y.bin".to_string(),
            "/a/x.bin".to_string(),
        ]
    );
}

#[test]
fn lock_timeout_fails_immediately_on_contention() {
    let fs = Arc::new(Filesystem::new());
    common::write_file(&fs, "/f", b"data");
    let fs2 = Arc::clone(&fs);
    let _writer = fs2.open("/f", OpenMode::ReadWrite, 0, None).unwrap();
    let err = fs
        .open("/f", OpenMode::WriteTruncate, 0, Some(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, Error::Blocking(_)));
}

#[test]
fn sequential_only_storage_rejects_non_tail_writes() {
    let fs = Filesystem::with_config(
        Config::builder().default_storage(DefaultStorage::Sequential).build(),
    )
    .unwrap();
    let mut handle = fs.open("/f", OpenMode::WriteTruncate, 0, None).unwrap();
    handle.write(b"hello").unwrap();
    handle.seek(memfs_core::SeekFrom::Start(0)).unwrap();
    let err = handle.write(b"H").unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));
}
