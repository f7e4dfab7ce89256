mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use memfs_core::{Error, Filesystem, OpenMode};

#[test]
fn multiple_readers_can_open_the_same_file_concurrently() {
    let fs = Arc::new(Filesystem::new());
    common::write_file(&fs, "/shared.txt", b"payload");

    let h1 = fs.open("/shared.txt", OpenMode::Read, 0, Some(Duration::ZERO)).unwrap();
    let h2 = fs.open("/shared.txt", OpenMode::Read, 0, Some(Duration::ZERO)).unwrap();
    drop(h1);
    drop(h2);
}

#[test]
fn writer_excludes_concurrent_reader() {
    let fs = Arc::new(Filesystem::new());
    common::write_file(&fs, "/shared.txt", b"payload");

    let _writer = fs.open("/shared.txt", OpenMode::ReadWrite, 0, None).unwrap();
    let err = fs
        .open("/shared.txt", OpenMode::Read, 0, Some(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, Error::Blocking(_)));
}

#[test]
fn writer_blocks_until_reader_closes_then_proceeds() {
    let fs = Arc::new(Filesystem::new());
    common::write_file(&fs, "/shared.txt", b"payload");

    let mut reader = fs.open("/shared.txt", OpenMode::Read, 0, None).unwrap();
    let fs2 = Arc::clone(&fs);
    let writer_thread = thread::spawn(move || {
        let mut writer = fs2
            .open("/shared.txt", OpenMode::ReadWrite, 0, Some(Duration::from_secs(2)))
            .unwrap();
        writer.write(b"!!!").unwrap();
        writer.close();
    });

    thread::sleep(Duration::from_millis(30));
    reader.close();
    writer_thread.join().unwrap();
    assert_eq!(common::read_file(&fs, "/shared.txt"), b"!!!load");
}

#[test]
fn fifty_threads_each_own_a_distinct_file_with_no_cross_talk() {
    let fs = Arc::new(common::fs_with_quota(16 * 1024 * 1024));
    let mut handles = Vec::new();
    for t in 0..50 {
        let fs = Arc::clone(&fs);
        handles.push(thread::spawn(move || {
            let path = format!("/c-{t}.bin");
            common::write_file(&fs, &path, &[t as u8; 32]);
            common::read_file(&fs, &path)
        }));
    }
    for (t, h) in handles.into_iter().enumerate() {
        assert_eq!(h.join().unwrap(), vec![t as u8; 32]);
    }
}
