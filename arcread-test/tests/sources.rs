use std::{
    fs,
    io::{Cursor, Read},
};

use arcread::{Config, ReadArchive, Status};
use arcread_test::{compress, init_logger, list, read_all, tar};

fn archive() -> Vec<u8> {
    tar::Builder::new()
        .file("first", &vec![1u8; 300_000])
        .dir("sub")
        .file("sub/second", b"second body")
        .symlink("sub/link", "second")
        .finish()
}

#[test]
fn file_on_disk() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.tar.gz");
    fs::write(&path, compress::gzip(&archive())).unwrap();

    let mut ar = ReadArchive::new();
    ar.support_filter_all().support_format_all();
    ar.open_file(&path).unwrap();
    let items = read_all(&mut ar).unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[2].data, b"second body");
    assert_eq!(ar.filter_name(), Some("gzip"));
    ar.finish().unwrap();
}

#[test]
fn seekable_skips_bodies() {
    init_logger();
    let data = archive();
    let mut ar = ReadArchive::new_with_config(Config::default().block_size(4096));
    ar.support_format_tar();
    ar.open_seekable(Cursor::new(&data)).unwrap();

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "first");
    // Skipped by seeking, not read.
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "sub");
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    let mut body = String::new();
    ar.data_reader().read_to_string(&mut body).unwrap();
    assert_eq!(body, "second body");
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().symlink(), Some("second".into()));
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    assert_eq!(ar.file_count(), 4);
}

#[test]
fn verbose_listing() {
    init_logger();
    let data = archive();
    let mut ar = ReadArchive::new();
    ar.support_format_all();
    ar.open_memory(&data).unwrap();
    let mut out = Vec::new();
    assert_eq!(list(&mut ar, &mut out).unwrap(), 4);
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "-rw-r--r-- user/users     300000 first",
            "drwxr-xr-x user/users          0 sub",
            "-rw-r--r-- user/users         11 sub/second",
            "lrw-r--r-- user/users          0 sub/link -> second",
        ],
    );
}
