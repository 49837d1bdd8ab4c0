use arcread::{Config, FilterCode, FormatCode, ReadArchive, Severity, Status};
use arcread_test::{Item, compress, init_logger, read_all, tar};

fn sample_tar() -> Vec<u8> {
    let noise: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
    tar::Builder::new()
        .file("notes.txt", &b"some fairly repetitive text\n".repeat(300))
        .file("noise.bin", &noise)
        .finish()
}

fn read_with(data: &[u8], config: Config) -> arcread::Result<(FilterCode, Vec<Item>)> {
    let mut ar = ReadArchive::new_with_config(config);
    ar.support_filter_all().support_format_all();
    ar.open_memory(data)?;
    let items = read_all(&mut ar)?;
    Ok((ar.filter_code().unwrap(), items))
}

#[test]
fn every_builtin_filter() {
    init_logger();
    let plain = sample_tar();
    let expected = read_with(&plain, Config::default()).unwrap();
    assert_eq!(expected.0, FilterCode::NONE);
    assert_eq!(expected.1.len(), 2);

    let cases: [(FilterCode, fn(&[u8]) -> Vec<u8>); 7] = [
        (FilterCode::GZIP, compress::gzip),
        (FilterCode::BZIP2, compress::bzip2),
        (FilterCode::XZ, compress::xz),
        (FilterCode::LZMA, compress::lzma),
        (FilterCode::ZSTD, compress::zstd),
        (FilterCode::LZ4, compress::lz4),
        (FilterCode::COMPRESS, compress::compress),
    ];
    for (code, wrap) in cases {
        let data = wrap(&plain);
        let (got_code, items) = read_with(&data, Config::default())
            .unwrap_or_else(|err| panic!("{code:?}: {err}"));
        assert_eq!(got_code, code);
        assert_eq!(items, expected.1, "{code:?}");
    }
}

#[test]
fn small_source_blocks() {
    init_logger();
    let plain = sample_tar();
    let data = compress::gzip(&plain);
    let mut ar = ReadArchive::new_with_config(Config::default().block_size(7));
    ar.support_filter_gzip().support_format_tar();
    ar.open_reader(&data[..]).unwrap();
    let items = read_all(&mut ar).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].data, b"some fairly repetitive text\n".repeat(300));
    // Record padding after the end marker may be left unread.
    assert!(ar.raw_position() <= data.len() as u64);
    assert!(ar.file_position() <= plain.len() as u64);
}

#[test]
fn concatenated_gzip_members() {
    init_logger();
    let plain = sample_tar();
    let (head, tail) = plain.split_at(4096);
    let mut data = compress::gzip(head);
    data.extend(compress::gzip(tail));
    let (code, items) = read_with(&data, Config::default()).unwrap();
    assert_eq!(code, FilterCode::GZIP);
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].path, "noise.bin");
}

#[test]
fn empty_payloads() {
    init_logger();
    let cases: [(FilterCode, fn(&[u8]) -> Vec<u8>); 5] = [
        (FilterCode::GZIP, compress::gzip),
        (FilterCode::BZIP2, compress::bzip2),
        (FilterCode::XZ, compress::xz),
        (FilterCode::ZSTD, compress::zstd),
        (FilterCode::COMPRESS, compress::compress),
    ];
    for (code, wrap) in cases {
        let data = wrap(b"");
        let mut ar = ReadArchive::new();
        ar.support_filter_all().support_format_all();
        ar.open_memory(&data).unwrap();
        assert_eq!(ar.filter_code(), Some(code));
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof, "{code:?}");
        assert_eq!(ar.format_code(), Some(FormatCode::EMPTY), "{code:?}");
        assert_eq!(ar.file_count(), 0);
    }
}

#[test]
fn gzip_zero_length_entry() {
    init_logger();
    let data = compress::gzip(&tar::Builder::new().file("nothing", b"").finish());
    let mut ar = ReadArchive::new();
    ar.support_filter_all().support_format_all();
    ar.open_memory(&data).unwrap();
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "nothing");
    assert_eq!(ar.entry().size(), Some(0));
    assert!(ar.read_data_block().unwrap().is_none());
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    assert_eq!(ar.file_count(), 1);
}

#[test]
fn gzip_crc_mismatch() {
    init_logger();
    let mut data = compress::gzip(&sample_tar());
    let at = data.len() - 8;
    data[at] ^= 0xFF;

    let err = read_with(&data, Config::default()).unwrap_err();
    assert_eq!(err.severity(), Severity::Fatal);
    assert!(err.to_string().contains("CRC"), "{err}");

    let (_, items) = read_with(&data, Config::default().verify_crc(false)).unwrap();
    assert_eq!(items.len(), 2);
}

#[test]
fn truncated_stream() {
    init_logger();
    let data = compress::xz(&sample_tar());
    let err = read_with(&data[..data.len() / 2], Config::default()).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn missing_filter_is_unrecognized() {
    init_logger();
    let data = compress::bzip2(&sample_tar());
    let mut ar = ReadArchive::new();
    ar.support_format_tar();
    // Only the implicit pass-through filter is registered.
    ar.open_memory(&data).unwrap();
    assert_eq!(ar.filter_code(), Some(FilterCode::NONE));
    assert!(ar.read_next_header().unwrap_err().is_fatal());
}

#[cfg(unix)]
#[test]
fn external_program() {
    init_logger();
    let plain = sample_tar();
    let mut wrapped = b"WRAP".to_vec();
    wrapped.extend_from_slice(&plain);

    let mut ar = ReadArchive::new();
    ar.support_filter_all()
        .support_filter_program("tail -c +5", Some(b"WRAP"))
        .support_format_all();
    ar.open_memory(&wrapped).unwrap();
    assert_eq!(ar.filter_code(), Some(FilterCode::PROGRAM));
    let items = read_all(&mut ar).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].path, "noise.bin");
    ar.close().unwrap();

    // Without a signature the program takes anything, here a compressed tar.
    let data = compress::gzip(&plain);
    let mut ar = ReadArchive::new();
    ar.support_filter_program("gzip -dc", None).support_format_tar();
    ar.open_memory(&data).unwrap();
    assert_eq!(ar.filter_code(), Some(FilterCode::PROGRAM));
    assert_eq!(read_all(&mut ar).unwrap().len(), 2);
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
}
