use memfs_core::{Config, Filesystem, OpenMode};

pub fn fs_with_quota(max_quota: u64) -> Filesystem {
    Filesystem::with_config(Config::builder().max_quota(max_quota).build()).unwrap()
}

pub fn write_file(fs: &Filesystem, path: &str, data: &[u8]) {
    let mut handle = fs.open(path, OpenMode::WriteTruncate, 0, None).unwrap();
    handle.write(data).unwrap();
    handle.close();
}

pub fn read_file(fs: &Filesystem, path: &str) -> Vec<u8> {
    let mut handle = fs.open(path, OpenMode::Read, 0, None).unwrap();
    let data = handle.read(None).unwrap();
    handle.close();
    data
}
