use super::*;

/// A scripted decoder claiming input that starts with `FAKE`.
#[derive(Default)]
struct Fake {
    entries: Vec<FakeEntry>,
    next: usize,
    block: usize,
}

#[derive(Default)]
struct FakeEntry {
    name: &'static str,
    size: u64,
    sparse: Vec<(u64, u64)>,
    blocks: Vec<(u64, &'static [u8])>,
    warn_after: Option<&'static str>,
}

impl Format for Fake {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        Ok(if r.read_ahead(4)?.starts_with(b"FAKE") { 100 } else { 0 })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        if r.position() == 0 {
            r.consume(4);
        }
        let Some(e) = self.entries.get(self.next) else {
            return Ok(Status::Eof);
        };
        self.next += 1;
        self.block = 0;
        entry.set_pathname(e.name);
        entry.set_size(Some(e.size));
        for &(offset, length) in &e.sparse {
            entry.add_sparse(offset, length);
        }
        Ok(Status::Ok)
    }

    fn read_data<'s>(&'s mut self, _r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        let i = self.block;
        self.block += 1;
        let e = &self.entries[self.next - 1];
        if let Some(&(offset, data)) = e.blocks.get(i) {
            return Ok(Some(Block { data, offset }));
        }
        if let Some(msg) = e.warn_after {
            bail!(Error::warn(msg));
        }
        Ok(None)
    }

    fn read_data_skip(&mut self, _r: &mut Reader<'_>) -> Result<()> {
        self.block = usize::MAX;
        Ok(())
    }
}

fn plain(name: &'static str, data: &'static [u8]) -> FakeEntry {
    FakeEntry {
        name,
        size: data.len() as u64,
        blocks: vec![(0, data)],
        ..FakeEntry::default()
    }
}

fn open_fake(entries: Vec<FakeEntry>) -> ReadArchive<'static> {
    let mut ar = ReadArchive::new();
    ar.support_format(Box::new(Fake {
        entries,
        ..Fake::default()
    }));
    ar.open_memory(b"FAKE").unwrap();
    ar
}

#[test]
fn registration_is_deduplicated() {
    let mut ar = ReadArchive::new();
    ar.support_format_tar().support_format_tar();
    assert_eq!(ar.core.formats.len(), 1);
    ar.support_format_all();
    assert_eq!(ar.core.formats.len(), 7);
    ar.support_format_raw().support_format_raw();
    assert_eq!(ar.core.formats.len(), 8);

    ar.support_filter_gzip().support_filter_gzip().support_filter_none();
    assert_eq!(ar.bidders.len(), 2);
    ar.support_filter_all();
    assert_eq!(ar.bidders.len(), 8);
}

#[test]
fn state_errors() {
    let mut ar = ReadArchive::new();
    let err = ar.read_next_header().unwrap_err();
    assert_eq!(err.severity(), Severity::Failed);
    assert!(ar.read_data_block().is_err());

    // Nothing to bid.
    assert_eq!(
        ar.open_memory(b"FAKE").unwrap_err().severity(),
        Severity::Failed,
    );

    let mut ar = open_fake(vec![plain("a", b"x")]);
    assert_eq!(
        ar.read_data(&mut [0; 4]).unwrap_err().severity(),
        Severity::Failed,
    );
    assert_eq!(
        ar.open_memory(b"FAKE").unwrap_err().severity(),
        Severity::Failed,
    );
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
}

#[test]
fn unrecognized_format_is_fatal() {
    let mut ar = ReadArchive::new();
    ar.support_format_tar();
    ar.open_memory(b"definitely not an archive").unwrap();
    let err = ar.read_next_header().unwrap_err();
    assert!(err.is_fatal());
    assert!(ar.error_string().unwrap().contains("unrecognized"));
    assert!(ar.read_next_header().unwrap_err().is_fatal());
    assert!(ar.read_data_skip().unwrap_err().is_fatal());
}

#[test]
fn eof_is_sticky() {
    let mut ar = open_fake(vec![plain("a", b"one"), plain("b", b"two")]);
    assert_eq!(ar.format_name(), None);
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.format_name(), Some("fake"));
    assert_eq!(ar.filter_code(), Some(FilterCode::NONE));
    assert_eq!(ar.header_position(), 0);
    // The body of `a` is skipped.
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "b");
    assert_eq!(ar.header_position(), 4);
    let mut out = Vec::new();
    assert_eq!(ar.read_data_into(&mut out).unwrap(), 3);
    assert_eq!(out, b"two");

    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    assert_eq!(ar.file_count(), 2);
}

#[test]
fn holes_read_as_zeroes() {
    let sparse = || FakeEntry {
        name: "sparse",
        size: 10,
        sparse: vec![(2, 2), (6, 2)],
        blocks: vec![(2, b"ab"), (6, b"cd")],
        ..FakeEntry::default()
    };
    let expected = b"\0\0ab\0\0cd\0\0";

    let mut ar = open_fake(vec![sparse(), sparse(), sparse()]);
    ar.read_next_header().unwrap();
    let mut got = Vec::new();
    let mut buf = [0u8; 3];
    loop {
        let n = ar.read_data(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got, expected);

    ar.read_next_header().unwrap();
    let mut got = Vec::new();
    assert_eq!(ar.read_data_into(&mut got).unwrap(), 10);
    assert_eq!(got, expected);

    ar.read_next_header().unwrap();
    let mut got = Vec::new();
    ar.data_reader().read_to_end(&mut got).unwrap();
    assert_eq!(got, expected);
}

#[test]
fn warning_after_data() {
    let mut ar = open_fake(vec![
        FakeEntry {
            warn_after: Some("checksum mismatch"),
            ..plain("a", b"abc")
        },
        plain("b", b""),
    ]);
    ar.read_next_header().unwrap();
    assert_eq!(ar.read_data_block().unwrap().unwrap().data, b"abc");
    let err = ar.read_data_block().unwrap_err();
    assert_eq!(err.severity(), Severity::Warn);
    assert_eq!(ar.error_string(), Some("checksum mismatch"));
    assert!(ar.read_data_block().unwrap().is_none());

    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.error_string(), None);
}

#[test]
fn close_keeps_names() {
    let mut ar = open_fake(vec![plain("a", b"x")]);
    ar.read_next_header().unwrap();
    ar.close().unwrap();
    ar.close().unwrap();
    assert_eq!(ar.format_name(), Some("fake"));
    assert_eq!(ar.filter_name(), Some("none"));
    assert_eq!(ar.raw_position(), 4);
    assert_eq!(
        ar.read_next_header().unwrap_err().severity(),
        Severity::Failed,
    );
    ar.finish().unwrap();
}

#[test]
fn read_from_reader() {
    let data = b"FAKE".to_vec();
    let mut ar = ReadArchive::new_with_config(Config::default().block_size(1));
    ar.support_format(Box::new(Fake {
        entries: vec![plain("a", b"x")],
        ..Fake::default()
    }));
    ar.open_reader(&data[..]).unwrap();
    assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
    assert_eq!(ar.entry().pathname(), "a");
    assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    assert_eq!(ar.file_position(), 4);
}
