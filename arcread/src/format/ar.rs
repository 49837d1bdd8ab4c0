//! Unix `ar` archives, in the GNU/SVR4 and BSD flavors.
//!
//! Members are a 60 byte text header and a body padded to an even offset.
//! The two flavors differ in how names longer than 16 bytes are stored: GNU
//! keeps them in a `//` string table member and refers to them as `/N`, BSD
//! prefixes the body with the name and marks the header `#1/LEN`.
use bstr::ByteSlice;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use super::{Block, Body, Format, FormatCode, OptionExt, Reader};
use crate::{
    Entry, Error, Result, Status,
    entry::{FileType, Timestamp},
};

const MAGIC: &[u8] = b"!<arch>\n";
const FMAG: &[u8] = b"`\n";

#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Header {
    name: [u8; 16],
    mtime: [u8; 12],
    uid: [u8; 6],
    gid: [u8; 6],
    mode: [u8; 8],
    size: [u8; 10],
    fmag: [u8; 2],
}

const HEADER_SIZE: usize = 60;
const _: () = assert!(size_of::<Header>() == HEADER_SIZE);

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("name", &format_args!("b\"{}\"", self.name.escape_ascii()))
            .field("size", &format_args!("b\"{}\"", self.size.escape_ascii()))
            .finish_non_exhaustive()
    }
}

/// A space padded number. An all-blank field is zero.
fn parse_field(field: &[u8], radix: u32) -> Result<u64> {
    let s = field.trim_end_with(|c| c == ' ' || c == '\0');
    if s.is_empty() {
        return Ok(0);
    }
    s.to_str()
        .ok()
        .and_then(|s| u64::from_str_radix(s, radix).ok())
        .context("malformed numeric field in ar header")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Unknown,
    Gnu,
    Bsd,
}

#[derive(Debug)]
pub struct Ar {
    started: bool,
    variant: Variant,
    /// GNU long name table.
    strtab: Option<Vec<u8>>,
    body: Body,
}

impl Default for Ar {
    fn default() -> Self {
        Self {
            started: false,
            variant: Variant::Unknown,
            strtab: None,
            body: Body::default(),
        }
    }
}

impl Ar {
    fn set_variant(&mut self, variant: Variant, r: &mut Reader<'_>) {
        self.variant = variant;
        match variant {
            Variant::Gnu => r.set_format(FormatCode::AR_GNU, "ar (GNU/SVR4)"),
            Variant::Bsd => r.set_format(FormatCode::AR_BSD, "ar (BSD)"),
            Variant::Unknown => r.set_format(FormatCode::AR, "ar"),
        }
    }

    /// Look up a `/N` name in the string table.
    fn long_name(&self, offset: &[u8]) -> Option<Vec<u8>> {
        let offset = usize::try_from(parse_field(offset, 10).ok()?).ok()?;
        let table = self.strtab.as_deref()?.get(offset..)?;
        let end = table.find_byte(b'\n').unwrap_or(table.len());
        let name = &table[..end];
        Some(name.strip_suffix(b"/").unwrap_or(name).to_vec())
    }
}

impl Format for Ar {
    fn name(&self) -> &'static str {
        "ar"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        let buf = r.read_ahead(MAGIC.len())?;
        Ok(if buf.starts_with(MAGIC) { 64 } else { 0 })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        self.body = Body::default();
        if !self.started {
            if r.require(MAGIC.len(), "ar signature")? != MAGIC {
                bail!(Error::fatal("missing ar signature"));
            }
            r.consume(MAGIC.len());
            self.started = true;
            self.set_variant(Variant::Unknown, r);
        }

        loop {
            if r.read_ahead(1)?.is_empty() {
                return Ok(Status::Eof);
            }
            let mut h = Header::new_zeroed();
            h.as_mut_bytes()
                .copy_from_slice(r.require(HEADER_SIZE, "ar member header")?);
            if h.fmag != FMAG {
                bail!(Error::fatal("invalid ar member header"));
            }
            r.consume(HEADER_SIZE);
            trace!("ar {h:?}");

            let mut size = parse_field(&h.size, 10)?;
            let pad = size & 1;
            let name = h.name.trim_end_with(|c| c == ' ');

            match name {
                // Symbol tables.
                b"/" | b"/SYM64/" | b"__.SYMDEF" | b"__.SYMDEF SORTED" => {
                    r.skip(size + pad)?;
                    continue;
                }
                b"//" => {
                    if size > r.config().long_name_size_limit {
                        bail!(Error::fatal("ar string table is too large"));
                    }
                    let len = size as usize;
                    self.strtab = Some(r.require(len, "ar string table")?.to_vec());
                    r.consume(len);
                    r.skip(pad)?;
                    self.set_variant(Variant::Gnu, r);
                    continue;
                }
                _ => {}
            }

            let mut warning = None;
            if let Some(len) = name.strip_prefix(b"#1/") {
                let len = parse_field(len, 10)?;
                if len > size {
                    bail!(Error::fatal("ar member name is longer than the member"));
                }
                if len > r.config().long_name_size_limit {
                    bail!(Error::fatal("ar member name is too long"));
                }
                let long = r.require(len as usize, "ar member name")?;
                entry.set_pathname(long.trim_end_with(|c| c == '\0'));
                let is_symdef = long.starts_with(b"__.SYMDEF");
                r.consume(len as usize);
                size -= len;
                self.set_variant(Variant::Bsd, r);
                if is_symdef {
                    r.skip(size + pad)?;
                    continue;
                }
            } else if let Some(offset) = name.strip_prefix(b"/") {
                match self.long_name(offset) {
                    Some(long) => entry.set_pathname(long),
                    None => {
                        warning = Some(format!(
                            "long name {:?} is not in the ar string table",
                            name.as_bstr(),
                        ));
                        entry.set_pathname(name);
                    }
                }
                self.set_variant(Variant::Gnu, r);
            } else if let Some(stripped) = name.strip_suffix(b"/") {
                entry.set_pathname(stripped);
                self.set_variant(Variant::Gnu, r);
            } else {
                entry.set_pathname(name);
                if self.variant == Variant::Unknown {
                    self.set_variant(Variant::Bsd, r);
                }
            }

            let mut mode = parse_field(&h.mode, 8)? as u32;
            if FileType::from_mode(mode).is_none() {
                mode |= FileType::Regular.to_mode_bits();
            }
            entry.set_mode(mode);
            entry.set_mtime(Some(Timestamp::new(parse_field(&h.mtime, 10)? as i64, 0)));
            entry.set_uid(parse_field(&h.uid, 10)?);
            entry.set_gid(parse_field(&h.gid, 10)?);
            entry.set_size(Some(size));
            self.body = Body::new(size, pad);

            return Ok(match warning {
                Some(msg) => r.warn(msg),
                None => Status::Ok,
            });
        }
    }

    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        self.body.read(r)
    }

    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        self.body.skip(r)
    }

    fn cleanup(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReadArchive;

    fn member(name: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "{name:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            1_700_000_000,
            1000,
            100,
            "100640",
            body.len(),
        )
        .into_bytes();
        assert_eq!(out.len(), HEADER_SIZE);
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(b'\n');
        }
        out
    }

    fn open(data: &[u8]) -> ReadArchive<'_> {
        let mut ar = ReadArchive::new();
        ar.support_format_ar();
        ar.open_memory(data).unwrap();
        ar
    }

    fn body(ar: &mut ReadArchive<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        ar.read_data_into(&mut out).unwrap();
        out
    }

    #[test]
    fn fields() {
        assert_eq!(parse_field(b"644     ", 8).unwrap(), 0o644);
        assert_eq!(parse_field(b"          ", 10).unwrap(), 0);
        assert!(parse_field(b"12x ", 10).unwrap_err().is_fatal());
    }

    #[test]
    fn gnu_archive() {
        let mut data = MAGIC.to_vec();
        data.extend(member("/", b"\0\0\0\0"));
        data.extend(member("//", b"a_rather_long_object_name.o/\n"));
        data.extend(member("short.o/", b"odd"));
        data.extend(member("/0", b"long body"));
        data.extend(member("/99", b""));

        let mut ar = open(&data);
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::AR_GNU));
        let e = ar.entry();
        assert_eq!(e.pathname(), "short.o");
        assert_eq!(e.mode(), 0o100640);
        assert_eq!((e.uid(), e.gid()), (1000, 100));
        assert_eq!(e.mtime(), Some(Timestamp::new(1_700_000_000, 0)));
        assert_eq!(e.size(), Some(3));
        assert_eq!(body(&mut ar), b"odd");

        // The odd body's padding is skipped along with it.
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.entry().pathname(), "a_rather_long_object_name.o");
        assert_eq!(body(&mut ar), b"long body");

        assert_eq!(ar.read_next_header().unwrap(), Status::Warn);
        assert_eq!(ar.entry().pathname(), "/99");
        assert!(ar.error_string().unwrap().contains("string table"));
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    }

    #[test]
    fn bsd_archive() {
        let mut data = MAGIC.to_vec();
        data.extend(member("#1/20", b"__.SYMDEF SORTED\0\0\0\0symbols"));
        data.extend(member("#1/24", b"very_long_member_name.o\0contents"));
        data.extend(member("plain.o", b"xy"));

        let mut ar = open(&data);
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::AR_BSD));
        assert_eq!(ar.entry().pathname(), "very_long_member_name.o");
        assert_eq!(ar.entry().size(), Some(8));
        assert_eq!(body(&mut ar), b"contents");

        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.entry().pathname(), "plain.o");
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    }

    #[test]
    fn bsd_name_length_is_bounded() {
        let mut data = MAGIC.to_vec();
        let mut huge = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            "#1/9999999999", 0, 0, 0, "100644", 9_999_999_999u64,
        )
        .into_bytes();
        huge.extend_from_slice(b"short");
        data.extend(huge);

        let mut ar = open(&data);
        let err = ar.read_next_header().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("too long"), "{err}");
    }

    #[test]
    fn bids_and_bad_headers() {
        let mut data = MAGIC.to_vec();
        assert_eq!(Ar::default().bid(&mut Reader::for_test(&data), 0).unwrap(), 64);
        assert_eq!(Ar::default().bid(&mut Reader::for_test(b"!<arch"), 0).unwrap(), 0);

        let mut bad = member("x", b"");
        bad[58] = b'!';
        data.extend(bad);
        let mut ar = open(&data);
        assert!(ar.read_next_header().unwrap_err().is_fatal());
    }
}
