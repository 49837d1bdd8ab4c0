use arcread::{FormatCode, ReadArchive, Severity, Status, entry::FileType};
use arcread_test::{Item, ar, cpio, init_logger, iso, read_all, read_memory, tar, zip};

fn item(path: &str, file_type: Option<FileType>, data: &[u8]) -> Item {
    Item {
        path: path.into(),
        file_type,
        hardlink: None,
        symlink: None,
        data: data.to_vec(),
    }
}

fn format_of(data: &[u8]) -> (FormatCode, &'static str) {
    let mut ar = ReadArchive::new();
    ar.support_filter_all().support_format_all();
    ar.open_memory(data).unwrap();
    ar.read_next_header().unwrap();
    (ar.format_code().unwrap(), ar.format_name().unwrap())
}

#[test]
fn tar_tree() {
    init_logger();
    let big: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let data = tar::Builder::new()
        .dir("dir")
        .file("dir/a.txt", b"hello")
        .file("dir/big", &big)
        .symlink("dir/link", "a.txt")
        .hardlink("dir/again", "dir/a.txt")
        .finish();

    let items = read_memory(&data).unwrap();
    assert_eq!(
        items,
        [
            item("dir", Some(FileType::Directory), b""),
            item("dir/a.txt", Some(FileType::Regular), b"hello"),
            item("dir/big", Some(FileType::Regular), &big),
            Item {
                symlink: Some("a.txt".into()),
                ..item("dir/link", Some(FileType::Symlink), b"")
            },
            Item {
                hardlink: Some("dir/a.txt".into()),
                ..item("dir/again", None, b"")
            },
        ],
    );
    assert_eq!(format_of(&data).0, FormatCode::TAR_USTAR);
}

#[test]
fn tar_extensions() {
    init_logger();
    let long = format!("{}/file.txt", "deep".repeat(40));
    let data = tar::Builder::new()
        .pax(&[
            ("path", long.as_bytes()),
            ("SCHILY.xattr.user.note", b"hi"),
            ("mtime", b"1700000000.25"),
        ])
        .file("short", b"pax body")
        .gnu_long_name(&format!("{long}.gnu"))
        .file("short2", b"gnu body")
        .sparse("holes.bin", 12, &[(2, b"ab"), (8, b"cd")])
        .finish();

    let mut ar = ReadArchive::new();
    ar.support_format_tar();
    ar.open_memory(&data).unwrap();

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.format_code(), Some(FormatCode::TAR_PAX_INTERCHANGE));
    let e = ar.entry();
    assert_eq!(e.pathname(), long.as_str());
    assert_eq!(e.xattrs().collect::<Vec<_>>(), [("user.note".into(), &b"hi"[..])]);
    assert_eq!(e.mtime().map(|t| (t.sec, t.nsec)), Some((1_700_000_000, 250_000_000)));

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), format!("{long}.gnu").as_str());
    let mut body = Vec::new();
    ar.read_data_into(&mut body).unwrap();
    assert_eq!(body, b"gnu body");

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "holes.bin");
    assert_eq!(ar.entry().size(), Some(12));
    let mut body = Vec::new();
    ar.read_data_into(&mut body).unwrap();
    assert_eq!(body, b"\0\0ab\0\0\0\0cd\0\0");

    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
}

#[test]
fn truncated_tar_is_fatal() {
    init_logger();
    let data = tar::Builder::new().file("a", &[7; 5000]).finish();
    let mut ar = ReadArchive::new();
    ar.support_format_tar();
    ar.open_memory(&data[..2048]).unwrap();
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    let mut body = Vec::new();
    let err = ar.read_data_into(&mut body).unwrap_err();
    assert_eq!(err.severity(), Severity::Fatal);
    assert!(ar.read_next_header().unwrap_err().is_fatal());
}

#[test]
fn cpio_hardlinks() {
    init_logger();
    let reg = 0o100644;
    let data = cpio::newc_archive(&[
        (cpio::Member::new("bin", 0o040755, 1), b""),
        (cpio::Member::new("bin/a", reg, 2).nlink(2), b"shared"),
        (cpio::Member::new("bin/b", reg, 2).nlink(2), b""),
        (cpio::Member::new("bin/c", reg, 3), b"own"),
    ]);
    let items = read_memory(&data).unwrap();
    let paths: Vec<_> = items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, ["bin", "bin/a", "bin/b", "bin/c"]);
    assert_eq!(items[1].data, b"shared");
    assert_eq!(items[2].hardlink.as_deref(), Some("bin/a"));
    assert_eq!(items[3].data, b"own");
    assert_eq!(format_of(&data).0, FormatCode::CPIO_SVR4_NOCRC);

    let mut odc = Vec::new();
    cpio::odc(&mut odc, &cpio::Member::new("x", reg, 9), b"portable");
    cpio::odc(&mut odc, &cpio::Member::new("TRAILER!!!", 0, 0), b"");
    let items = read_memory(&odc).unwrap();
    assert_eq!(items, [item("x", Some(FileType::Regular), b"portable")]);
    assert_eq!(format_of(&odc).0, FormatCode::CPIO_POSIX);
}

#[test]
fn zip_entries() {
    init_logger();
    let text = b"zip me, zip me, zip me again and again".repeat(50);
    let data = zip::Builder::new()
        .entry("docs/", b"", zip::Method::Stored, false)
        .entry("docs/stored.txt", b"plain", zip::Method::Stored, false)
        .entry("docs/deflated.txt", &text, zip::Method::Deflated, false)
        .entry("docs/streamed.txt", &text, zip::Method::Deflated, true)
        .finish();

    let items = read_memory(&data).unwrap();
    assert_eq!(
        items,
        [
            item("docs/", Some(FileType::Directory), b""),
            item("docs/stored.txt", Some(FileType::Regular), b"plain"),
            item("docs/deflated.txt", Some(FileType::Regular), &text),
            item("docs/streamed.txt", Some(FileType::Regular), &text),
        ],
    );
    // The name follows the method of the entry just read.
    assert_eq!(format_of(&data), (FormatCode::ZIP, "ZIP 1.0 (uncompressed)"));
}

#[test]
fn zip_skips_unread_bodies() {
    init_logger();
    let text = b"0123456789".repeat(1000);
    let data = zip::Builder::new()
        .entry("a", &text, zip::Method::Deflated, true)
        .entry("b", b"tail", zip::Method::Stored, false)
        .finish();
    let mut ar = ReadArchive::new();
    ar.support_format_zip();
    ar.open_memory(&data).unwrap();
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().size(), None);
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "b");
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
}

#[test]
fn iso_image() {
    init_logger();
    let data = iso::Builder::new()
        .file("README.TXT", b"read me")
        .file("DOCS/GUIDE.TXT", &[b'g'; 5000])
        .file("DOCS/EMPTY", b"")
        .dir("DOCS/SUB")
        .finish();

    let mut items = read_memory(&data).unwrap();
    items.sort_by(|a, b| a.path.cmp(&b.path));
    let paths: Vec<_> = items
        .iter()
        .map(|i| (i.path.as_str(), i.file_type, i.data.len()))
        .collect();
    assert_eq!(
        paths,
        [
            ("DOCS", Some(FileType::Directory), 0),
            ("DOCS/EMPTY", Some(FileType::Regular), 0),
            ("DOCS/GUIDE.TXT", Some(FileType::Regular), 5000),
            ("DOCS/SUB", Some(FileType::Directory), 0),
            ("README.TXT", Some(FileType::Regular), 7),
        ],
    );
    assert_eq!(items[4].data, b"read me");
    assert_eq!(format_of(&data).0, FormatCode::ISO9660);
}

#[test]
fn ar_and_mtree() {
    init_logger();
    let data = ar::gnu(&[
        ("short.o", b"tiny"),
        ("a_really_long_object_file_name.o", b"long one"),
    ]);
    let items = read_memory(&data).unwrap();
    assert_eq!(
        items,
        [
            item("short.o", Some(FileType::Regular), b"tiny"),
            item("a_really_long_object_file_name.o", Some(FileType::Regular), b"long one"),
        ],
    );
    assert_eq!(format_of(&data).0, FormatCode::AR_GNU);

    let spec = b"#mtree\n/set type=file mode=0644\n. type=dir\n    etc type=dir\n        passwd size=10\n    ..\nusr/bin/env type=link link=/bin/env\n";
    let items = read_memory(spec).unwrap();
    let got: Vec<_> = items
        .iter()
        .map(|i| (i.path.as_str(), i.file_type, i.symlink.as_deref()))
        .collect();
    assert_eq!(
        got,
        [
            (".", Some(FileType::Directory), None),
            ("./etc", Some(FileType::Directory), None),
            ("./etc/passwd", Some(FileType::Regular), None),
            ("usr/bin/env", Some(FileType::Symlink), Some("/bin/env")),
        ],
    );
    assert_eq!(format_of(spec), (FormatCode::MTREE, "mtree"));
}

#[test]
fn empty_and_raw() {
    init_logger();
    assert!(read_memory(b"").unwrap().is_empty());
    assert_eq!(format_of(b"").0, FormatCode::EMPTY);

    let mut ar = ReadArchive::new();
    ar.support_filter_all().support_format_all();
    ar.open_memory(b"no archive here").unwrap();
    assert!(ar.read_next_header().unwrap_err().is_fatal());

    let data = arcread_test::compress::gzip(b"no archive here");
    let mut ar = ReadArchive::new();
    ar.support_filter_all().support_format_all().support_format_raw();
    ar.open_memory(&data).unwrap();
    let items = read_all(&mut ar).unwrap();
    assert_eq!(items, [item("data", Some(FileType::Regular), b"no archive here")]);
    assert_eq!(ar.format_code(), Some(FormatCode::RAW));
}
