use super::*;
use crate::{ReadArchive, Severity};

/// 2024-03-15 12:34:56 UTC.
const DATE: [u8; 7] = [124, 3, 15, 12, 34, 56, 0];
const MTIME: i64 = 1_710_506_096;

fn both32(v: u32) -> Vec<u8> {
    let mut out = v.to_le_bytes().to_vec();
    out.extend_from_slice(&v.to_be_bytes());
    out
}

fn record(name: &[u8], sector: u32, size: u32, flags: u8, su: &[u8]) -> Vec<u8> {
    let mut r = vec![0u8; 2];
    r.extend(both32(sector));
    r.extend(both32(size));
    r.extend_from_slice(&DATE);
    r.extend_from_slice(&[flags, 0, 0, 1, 0, 0, 1, name.len() as u8]);
    r.extend_from_slice(name);
    if name.len() % 2 == 0 {
        r.push(0);
    }
    r.extend_from_slice(su);
    if r.len() % 2 == 1 {
        r.push(0);
    }
    r[0] = r.len() as u8;
    r
}

fn dir_record(name: &[u8], sector: u32) -> Vec<u8> {
    record(name, sector, SECTOR as u32, FLAG_DIRECTORY, &[])
}

/// Directory extent with its `.` and `..` records.
fn directory(own: u32, parent: u32, dot_su: &[u8], children: &[Vec<u8>]) -> Vec<u8> {
    let mut out = record(b"\0", own, SECTOR as u32, FLAG_DIRECTORY, dot_su);
    out.extend(record(b"\x01", parent, SECTOR as u32, FLAG_DIRECTORY, &[]));
    for c in children {
        out.extend_from_slice(c);
    }
    out
}

fn su_entry(sig: &[u8; 2], data: &[u8]) -> Vec<u8> {
    let mut out = sig.to_vec();
    out.push((data.len() + 4) as u8);
    out.push(1);
    out.extend_from_slice(data);
    out
}

/// An image of `blocks` sectors with the root directory at sector 18.
fn image(blocks: u32, sectors: &[(u32, &[u8])]) -> Vec<u8> {
    let mut img = vec![0u8; blocks as usize * SECTOR];
    let pvd = &mut img[16 * SECTOR..17 * SECTOR];
    pvd[0] = TYPE_PRIMARY;
    pvd[1..6].copy_from_slice(STANDARD_ID);
    pvd[6] = 1;
    pvd[80..88].copy_from_slice(&both32(blocks));
    pvd[128..130].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    pvd[130..132].copy_from_slice(&(SECTOR as u16).to_be_bytes());
    pvd[156..190].copy_from_slice(&record(b"\0", 18, SECTOR as u32, FLAG_DIRECTORY, &[]));
    pvd[881] = 1;
    let term = &mut img[17 * SECTOR..18 * SECTOR];
    term[0] = TYPE_TERMINATOR;
    term[1..6].copy_from_slice(STANDARD_ID);
    term[6] = 1;

    for &(sector, data) in sectors {
        let at = sector as usize * SECTOR;
        img[at..at + data.len()].copy_from_slice(data);
    }
    img
}

fn open(data: &[u8]) -> ReadArchive<'_> {
    let mut ar = ReadArchive::new();
    ar.support_format_iso9660();
    ar.open_memory(data).unwrap();
    ar
}

fn body(ar: &mut ReadArchive<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    ar.read_data_into(&mut out).unwrap();
    out
}

#[test]
fn names_and_times() {
    assert_eq!(iso_name(b"README.TXT;1"), b"README.TXT");
    assert_eq!(iso_name(b"MAKEFILE.;1"), b"MAKEFILE");
    assert_eq!(iso_name(b"DIR"), b"DIR");

    assert_eq!(short_time(&DATE), Some(Timestamp::new(MTIME, 0)));
    // One hour east of GMT.
    let mut east = DATE;
    east[6] = 4;
    assert_eq!(short_time(&east), Some(Timestamp::new(MTIME - 3600, 0)));
    assert_eq!(short_time(&[0; 7]), None);

    assert_eq!(
        long_time(b"2024031512345650\0"),
        Some(Timestamp::new(MTIME, 500_000_000)),
    );
    assert_eq!(long_time(b"0000000000000000\0"), None);
    assert_eq!(long_time(b"2024x31512345650\0"), None);
}

#[test]
fn bids() {
    let img = image(20, &[(18, &directory(18, 18, &[], &[]))]);
    assert_eq!(Iso9660::default().bid(&mut Reader::for_test(&img), 0).unwrap(), 48);
    assert_eq!(Iso9660::default().bid(&mut Reader::for_test(&img), 64).unwrap(), 0);
    assert_eq!(Iso9660::default().bid(&mut Reader::for_test(&img[..32768]), 0).unwrap(), 0);
    let zeros = vec![0u8; 40000];
    assert_eq!(Iso9660::default().bid(&mut Reader::for_test(&zeros), 0).unwrap(), 0);
}

#[test]
fn plain_tree_in_disk_order() {
    // The directory is listed last but stored first.
    let root = directory(
        18,
        18,
        &[],
        &[
            record(b"README.;1", 20, 6, 0, &[]),
            record(b"EMPTY.TXT;1", 0, 0, 0, &[]),
            dir_record(b"DIR", 19),
        ],
    );
    let sub = directory(19, 18, &[], &[record(b"FILE.TXT;1", 21, 11, 0, &[])]);
    let img = image(
        22,
        &[(18, &root), (19, &sub), (20, b"readme"), (21, b"hello world")],
    );

    let mut ar = open(&img);
    let mut seen = Vec::new();
    loop {
        match ar.read_next_header().unwrap() {
            Status::Eof => break,
            status => {
                assert_eq!(status, Status::Ok);
                assert_eq!(ar.format_code(), Some(FormatCode::ISO9660));
                let e = ar.entry();
                assert_eq!(e.mtime(), Some(Timestamp::new(MTIME, 0)));
                let path = e.pathname().to_string();
                let is_dir = e.is_dir();
                seen.push((path, is_dir, e.perm(), body(&mut ar)));
            }
        }
    }
    assert_eq!(
        seen,
        [
            ("EMPTY.TXT".to_owned(), false, 0o444, Vec::new()),
            ("DIR".to_owned(), true, 0o555, Vec::new()),
            ("README".to_owned(), false, 0o444, b"readme".to_vec()),
            ("DIR/FILE.TXT".to_owned(), false, 0o444, b"hello world".to_vec()),
        ],
    );
    assert_eq!(ar.file_count(), 4);
}

#[test]
fn out_of_order_file_warns() {
    let root = directory(
        18,
        18,
        &[],
        &[
            record(b"BEHIND.;1", 5, 4, 0, &[]),
            record(b"AHEAD.;1", 19, 5, 0, &[]),
        ],
    );
    let img = image(20, &[(5, b"lost"), (18, &root), (19, b"found")]);

    let mut ar = open(&img);
    assert_eq!(ar.read_next_header().unwrap(), Status::Warn);
    assert_eq!(ar.entry().pathname(), "BEHIND");
    assert!(ar.error_string().unwrap().contains("out-of-order"));
    assert_eq!(body(&mut ar), b"");

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "AHEAD");
    assert_eq!(body(&mut ar), b"found");
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
}

#[test]
fn shared_extents_are_hardlinks() {
    let root = directory(
        18,
        18,
        &[],
        &[record(b"A.;1", 19, 3, 0, &[]), record(b"B.;1", 19, 3, 0, &[])],
    );
    let img = image(20, &[(18, &root), (19, b"abc")]);

    let mut ar = open(&img);
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "A");
    assert_eq!(body(&mut ar), b"abc");
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "B");
    assert_eq!(ar.entry().hardlink(), Some("A".into()));
    assert_eq!(ar.entry().size(), Some(0));
}

#[test]
fn rock_ridge() {
    let sp = su_entry(b"SP", &[0xBE, 0xEF, 0]);
    let mut px = Vec::new();
    for v in [0o100600, 1, 1000, 100] {
        px.extend(both32(v));
    }
    let mut link_px = Vec::new();
    for v in [0o120777, 1, 0, 0] {
        link_px.extend(both32(v));
    }

    // The name lives in a continuation area right after the root directory.
    let continued = su_entry(b"NM", b"\0Long Name.txt");
    let mut ce = both32(19);
    ce.extend(both32(0));
    ce.extend(both32(continued.len() as u32));
    let mut file_su = su_entry(b"PX", &px);
    file_su.extend(su_entry(b"CE", &ce));

    let mut link_su = su_entry(b"NM", b"\0latest");
    link_su.extend(su_entry(b"PX", &link_px));
    link_su.extend(su_entry(b"SL", b"\0\x00\x04data"));

    let root = directory(
        18,
        18,
        &sp,
        &[
            record(b"LONGNAME.TXT;1", 20, 4, 0, &file_su),
            record(b"LATEST.;1", 0, 0, 0, &link_su),
        ],
    );
    let img = image(21, &[(18, &root), (19, &continued), (20, b"data")]);

    let mut ar = open(&img);
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.format_code(), Some(FormatCode::ISO9660_ROCKRIDGE));
    let e = ar.entry();
    assert_eq!(e.pathname(), "latest");
    assert_eq!(e.file_type(), Some(FileType::Symlink));
    assert_eq!(e.symlink(), Some("data".into()));
    assert_eq!(e.size(), Some(0));

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    let e = ar.entry();
    assert_eq!(e.pathname(), "Long Name.txt");
    assert_eq!(e.perm(), 0o600);
    assert_eq!((e.uid(), e.gid()), (1000, 100));
    assert_eq!(body(&mut ar), b"data");
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
}

#[test]
fn extent_beyond_volume_is_fatal() {
    let root = directory(18, 18, &[], &[record(b"BIG.;1", 19, 1 << 20, 0, &[])]);
    let img = image(20, &[(18, &root)]);

    let mut ar = open(&img);
    let err = ar.read_next_header().unwrap_err();
    assert_eq!(err.severity(), Severity::Fatal);
    assert!(ar.read_next_header().unwrap_err().is_fatal());
}

#[test]
fn depth_limit() {
    let root = directory(18, 18, &[], &[dir_record(b"A", 19)]);
    let a = directory(19, 18, &[], &[dir_record(b"B", 20)]);
    let b = directory(20, 19, &[], &[]);
    let img = image(21, &[(18, &root), (19, &a), (20, &b)]);

    let mut ar = ReadArchive::new_with_config(crate::Config::default().iso_depth_limit(1));
    ar.support_format_iso9660();
    ar.open_memory(&img).unwrap();
    // A is only emitted once its own directory was read.
    assert!(ar.read_next_header().unwrap_err().is_fatal());

    let mut ar = open(&img);
    let mut paths = Vec::new();
    while ar.read_next_header().unwrap() != Status::Eof {
        paths.push(ar.entry().pathname().to_string());
    }
    assert_eq!(paths, ["A", "A/B"]);
}
