//! tar in its v7, ustar, pax and GNU flavors.
//!
//! An archive is a sequence of 512-byte headers, each followed by its body
//! padded to whole blocks, and normally ends with two zero blocks. Special
//! headers (GNU long names, pax extended attributes, Solaris ACLs) precede the
//! ordinary header they amend and are folded into the same entry. Values are
//! applied in increasing precedence: ordinary header fields, GNU long
//! names, pax global attributes, pax local attributes.
use std::{collections::VecDeque, fmt, mem::offset_of, ops::Range};

use bstr::{BString, ByteSlice};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, transmute_ref};

use super::{Block, Body, Format, FormatCode, Reader, padding};
use crate::{
    Entry, Error, Result, Status,
    entry::{AclType, Device, FileType, SparseRun, Timestamp},
};

mod pax;
mod sparse;

const BLOCK: usize = 512;

/// The common part of all tar headers. `tail` is either [`UstarTail`] or
/// [`GnuTail`], depending on the magic.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Header {
    name: [u8; 100],
    mode: [u8; 8],
    uid: [u8; 8],
    gid: [u8; 8],
    size: [u8; 12],
    mtime: [u8; 12],
    checksum: [u8; 8],
    typeflag: u8,
    linkname: [u8; 100],
    magic: [u8; 6],
    version: [u8; 2],
    uname: [u8; 32],
    gname: [u8; 32],
    devmajor: [u8; 8],
    devminor: [u8; 8],
    tail: [u8; 167],
}

const _: () = assert!(size_of::<Header>() == BLOCK);

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct UstarTail {
    prefix: [u8; 155],
    _pad: [u8; 12],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct GnuTail {
    atime: [u8; 12],
    ctime: [u8; 12],
    offset: [u8; 12],
    longnames: [u8; 4],
    _unused: u8,
    sparse: [u8; 4 * sparse::OLD_ENTRY],
    isextended: u8,
    realsize: [u8; 12],
    _pad: [u8; 17],
}

const CHECKSUM_RANGE: Range<usize> = offset_of!(Header, checksum)..offset_of!(Header, typeflag);

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("name", &cstr(&self.name).as_bstr())
            .field("typeflag", &char::from(self.typeflag))
            .field("size", &format_args!("b\"{}\"", self.size.escape_ascii()))
            .field("magic", &format_args!("b\"{}\"", self.magic.escape_ascii()))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    V7,
    Ustar,
    Gnu,
}

impl Header {
    fn from_block(block: &[u8]) -> Self {
        let mut hdr = Self::new_zeroed();
        hdr.as_mut_bytes().copy_from_slice(&block[..BLOCK]);
        hdr
    }

    fn kind(&self) -> Kind {
        match (&self.magic, &self.version) {
            (b"ustar\0", _) => Kind::Ustar,
            (b"ustar ", b" \0") => Kind::Gnu,
            _ => Kind::V7,
        }
    }

    fn ustar(&self) -> &UstarTail {
        transmute_ref!(&self.tail)
    }

    fn gnu(&self) -> &GnuTail {
        transmute_ref!(&self.tail)
    }
}

fn is_zero(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Accept both the unsigned sum and the signed sum some historic
/// implementations computed.
fn checksum_ok(block: &[u8]) -> bool {
    let stored = parse_octal(&block[CHECKSUM_RANGE]);
    let (mut unsigned, mut signed) = (0u64, 0i64);
    for (i, &b) in block[..BLOCK].iter().enumerate() {
        let b = if CHECKSUM_RANGE.contains(&i) { b' ' } else { b };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }
    stored == unsigned || i64::try_from(stored) == Ok(signed)
}

/// The bytes of a NUL-terminated field.
fn cstr(field: &[u8]) -> &[u8] {
    match field.find_byte(0) {
        Some(end) => &field[..end],
        None => field,
    }
}

/// Octal digits after optional leading blanks, saturating on overflow.
fn parse_octal(field: &[u8]) -> u64 {
    field
        .iter()
        .skip_while(|&&b| b == b' ' || b == b'\t')
        .take_while(|b| (b'0'..=b'7').contains(b))
        .try_fold(0u64, |acc, &d| {
            acc.checked_mul(8)?.checked_add(u64::from(d - b'0'))
        })
        .unwrap_or(u64::MAX)
}

/// GNU base-256: the high bit of the first byte is set and the rest is a
/// big-endian two's complement number. Saturates on overflow.
fn parse_base256(field: &[u8]) -> i64 {
    let mut v: i64 = if field[0] & 0x40 != 0 { -1 } else { 0 };
    v = (v << 6) | i64::from(field[0] & 0x3F);
    for &b in &field[1..] {
        if v > i64::MAX >> 8 {
            return i64::MAX;
        }
        if v < i64::MIN >> 8 {
            return i64::MIN;
        }
        v = (v << 8) | i64::from(b);
    }
    v
}

/// A numeric header field in either encoding.
fn parse_number(field: &[u8]) -> i64 {
    match field.first() {
        Some(&b) if b & 0x80 != 0 => parse_base256(field),
        _ => i64::try_from(parse_octal(field)).unwrap_or(i64::MAX),
    }
}

fn parse_size(field: &[u8]) -> Result<u64> {
    u64::try_from(parse_number(field))
        .map_err(|_| Error::fatal("damaged tar archive: negative entry size"))
}

fn valid_typeflag(flag: u8) -> bool {
    matches!(
        flag,
        b'\0' | b'0'..=b'7' | b'A' | b'D' | b'K' | b'L' | b'M' | b'N' | b'S' | b'V' | b'g' | b'x' | b'X'
    )
}

/// Read a special header body of at most `limit` bytes, along with its padding.
fn read_body(r: &mut Reader<'_>, size: u64, limit: u64, what: &'static str) -> Result<Vec<u8>> {
    if size > limit {
        bail!(Error::fatal(format!(
            "{what} of {size} bytes exceeds the limit of {limit} bytes",
        )));
    }
    let len = size as usize;
    let data = r.require(len, what)?.to_vec();
    r.consume(len);
    r.skip(padding(size, BLOCK as u64))?;
    Ok(data)
}

/// What special headers contributed to the entry being assembled.
#[derive(Debug, Default)]
struct Pending {
    longname: Option<Vec<u8>>,
    longlink: Option<Vec<u8>>,
    pax: Vec<(BString, Vec<u8>)>,
    pax_seen: bool,
    acl: Option<Vec<u8>>,
    warning: Option<String>,
}

#[derive(Debug, Default)]
pub struct Tar {
    /// Attributes of pax global headers, applied to every later entry.
    global: Vec<(BString, Vec<u8>)>,
    body: Body,
    /// Stored runs of a sparse entry not yet delivered.
    runs: VecDeque<SparseRun>,
}

impl Tar {
    /// Read headers up to and including the next ordinary one.
    fn read_headers(&mut self, r: &mut Reader<'_>, pending: &mut Pending) -> Result<Option<Header>> {
        let cfg = r.config().clone();
        let mut specials = 0u32;
        loop {
            let buf = r.read_ahead(BLOCK)?;
            if buf.is_empty() && specials == 0 {
                // Archives cut off after the last entry are common enough.
                return Ok(None);
            }
            if buf.len() < BLOCK {
                bail!(Error::truncated("tar header"));
            }
            if is_zero(&buf[..BLOCK]) {
                r.consume(BLOCK);
                if specials != 0 {
                    bail!(Error::fatal(
                        "damaged tar archive: end of archive after a special header"
                    ));
                }
                // The second end block is optional.
                if r.read_ahead(BLOCK)?.get(..BLOCK).is_some_and(is_zero) {
                    r.consume(BLOCK);
                }
                return Ok(None);
            }
            if !checksum_ok(buf) {
                r.consume(BLOCK);
                bail!(Error::retry("damaged tar archive: header checksum mismatch"));
            }
            let hdr = Header::from_block(buf);
            r.consume(BLOCK);
            trace!("tar header {hdr:?}");

            let size = parse_size(&hdr.size)?;
            match hdr.typeflag {
                b'L' => {
                    let body = read_body(r, size, cfg.long_name_size_limit, "GNU long name")?;
                    pending.longname = Some(cstr(&body).to_vec());
                }
                b'K' => {
                    let body = read_body(r, size, cfg.long_name_size_limit, "GNU long link")?;
                    pending.longlink = Some(cstr(&body).to_vec());
                }
                b'x' | b'X' => {
                    let body = read_body(r, size, cfg.pax_header_size_limit, "pax header")?;
                    pending.pax_seen = true;
                    match pax::parse_records(&body) {
                        Ok(recs) => pending
                            .pax
                            .extend(recs.into_iter().map(|(k, v)| (k.into(), v.to_vec()))),
                        Err(msg) => {
                            pending.warning.get_or_insert_with(|| msg.into());
                        }
                    }
                }
                b'g' => {
                    let body = read_body(r, size, cfg.pax_header_size_limit, "pax global header")?;
                    match pax::parse_records(&body) {
                        Ok(recs) => {
                            for (k, v) in recs {
                                self.global.retain(|(key, _)| key != k);
                                if !v.is_empty() {
                                    self.global.push((k.into(), v.to_vec()));
                                }
                            }
                        }
                        Err(msg) => {
                            pending.warning.get_or_insert_with(|| msg.into());
                        }
                    }
                }
                b'A' => {
                    let body = read_body(r, size, cfg.pax_header_size_limit, "Solaris ACL")?;
                    pending.acl = Some(body);
                }
                b'V' => {
                    // Volume label.
                    r.skip(size + padding(size, BLOCK as u64))?;
                }
                _ => return Ok(Some(hdr)),
            }

            specials += 1;
            if specials > cfg.header_recursion_limit {
                bail!(Error::fatal("damaged tar archive: too many special headers"));
            }
        }
    }
}

impl Format for Tar {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        let buf = r.read_ahead(BLOCK)?;
        if buf.len() < BLOCK {
            return Ok(0);
        }
        if is_zero(&buf[..BLOCK]) {
            // An empty archive, or just a lot of zeroes.
            return Ok(10);
        }
        if !checksum_ok(buf) {
            return Ok(0);
        }
        let hdr = Header::from_block(buf);
        let mut bid = 48;
        match hdr.kind() {
            Kind::Ustar | Kind::Gnu => bid += 56,
            Kind::V7 => {
                // Without a magic, insist on a plausible header.
                let mode_ok = hdr.mode.iter().all(|&b| matches!(b, b'0'..=b'7' | b' ' | 0));
                if !mode_ok || !matches!(hdr.typeflag, b'\0' | b'0'..=b'7') {
                    return Ok(0);
                }
            }
        }
        if valid_typeflag(hdr.typeflag) {
            bid += 2;
        }
        Ok(bid)
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        self.body = Body::default();
        self.runs.clear();

        let mut pending = Pending::default();
        let Some(hdr) = self.read_headers(r, &mut pending)? else {
            return Ok(Status::Eof);
        };
        let kind = hdr.kind();
        let size = parse_size(&hdr.size)?;

        let name = cstr(&hdr.name);
        let prefix = match kind {
            Kind::Ustar => cstr(&hdr.ustar().prefix),
            _ => &[],
        };
        if prefix.is_empty() {
            entry.set_pathname(name);
        } else {
            entry.set_pathname([prefix, b"/", name].concat());
        }
        entry.set_mode(parse_number(&hdr.mode) as u32 & 0o7777);
        entry.set_uid(parse_number(&hdr.uid).max(0) as u64);
        entry.set_gid(parse_number(&hdr.gid).max(0) as u64);
        entry.set_mtime(Some(Timestamp::new(parse_number(&hdr.mtime), 0)));
        if kind != Kind::V7 {
            let (uname, gname) = (cstr(&hdr.uname), cstr(&hdr.gname));
            if !uname.is_empty() {
                entry.set_uname(uname);
            }
            if !gname.is_empty() {
                entry.set_gname(gname);
            }
        }
        if kind == Kind::Gnu {
            let gnu = hdr.gnu();
            if gnu.atime[0] != 0 {
                entry.set_atime(Some(Timestamp::new(parse_number(&gnu.atime), 0)));
            }
            if gnu.ctime[0] != 0 {
                entry.set_ctime(Some(Timestamp::new(parse_number(&gnu.ctime), 0)));
            }
        }

        let linkname = cstr(&hdr.linkname);
        let (mut is_hardlink, mut has_body) = (false, true);
        let mut old_sparse = None;
        match hdr.typeflag {
            b'1' => {
                // Only the link is recorded, not the type of what it points to.
                entry.set_hardlink(linkname);
                is_hardlink = true;
            }
            b'2' => {
                entry.set_file_type(Some(FileType::Symlink));
                entry.set_symlink(linkname);
                has_body = false;
            }
            b'3' | b'4' => {
                let ty = if hdr.typeflag == b'3' {
                    FileType::CharDevice
                } else {
                    FileType::BlockDevice
                };
                entry.set_file_type(Some(ty));
                let major = parse_number(&hdr.devmajor).max(0) as u32;
                let minor = parse_number(&hdr.devminor).max(0) as u32;
                entry.set_rdev(Device::new(major, minor));
                has_body = false;
            }
            b'5' => {
                entry.set_file_type(Some(FileType::Directory));
                has_body = false;
            }
            b'6' => {
                entry.set_file_type(Some(FileType::Fifo));
                has_body = false;
            }
            // GNU dumpdir, the body lists the directory contents.
            b'D' => entry.set_file_type(Some(FileType::Directory)),
            b'S' => {
                entry.set_file_type(Some(FileType::Regular));
                let gnu = hdr.gnu();
                let mut runs = Vec::new();
                sparse::push_old_entries(&mut runs, &gnu.sparse);
                if gnu.isextended != 0 {
                    let limit = r.config().header_recursion_limit;
                    sparse::read_old_extensions(r, &mut runs, limit)?;
                }
                old_sparse = Some((runs, parse_number(&gnu.realsize).max(0) as u64));
            }
            flag => {
                let ty = if matches!(flag, b'\0' | b'0') && name.ends_with(b"/") {
                    FileType::Directory
                } else {
                    FileType::Regular
                };
                entry.set_file_type(Some(ty));
            }
        }

        if let Some(name) = pending.longname.take() {
            entry.set_pathname(name);
        }
        if let Some(link) = pending.longlink.take() {
            set_link(entry, is_hardlink, link);
        }

        if let Some(text) = &pending.acl {
            apply_solaris_acl(entry, text, &mut pending.warning);
        }

        let mut ext = pax::PaxExt::default();
        let local = &pending.pax;
        let global = self
            .global
            .iter()
            .filter(|(key, _)| !local.iter().any(|(k, _)| k == key));
        for (k, v) in global.chain(local) {
            ext.apply(entry, k, v);
        }
        if let Some(link) = ext.linkpath.take() {
            set_link(entry, is_hardlink, link);
        }

        let mut stored = match (ext.size, has_body) {
            (_, false) => 0,
            (Some(size), true) => size,
            (None, true) if is_hardlink => 0,
            (None, true) => size,
        };
        let body_padding = padding(stored, BLOCK as u64);
        let mut entry_size = stored;

        let pax_sparse = ext.sparse_major.is_some() || !ext.sparse_map.is_empty();
        let sparse = if pax_sparse {
            let runs = if ext.sparse_map_in_body() {
                let limit = r.config().pax_header_size_limit;
                let (runs, used) = sparse::read_map_1_0(r, stored, limit)?;
                stored -= used;
                runs
            } else {
                std::mem::take(&mut ext.sparse_map)
            };
            Some((runs, ext.realsize.unwrap_or(stored)))
        } else {
            old_sparse.map(|(runs, realsize)| (runs, ext.realsize.unwrap_or(realsize)))
        };
        if let Some(name) = ext.sparse_name.take() {
            entry.set_pathname(name);
        }
        if let Some((runs, realsize)) = sparse {
            sparse::validate(&runs, stored, realsize)?;
            for &(offset, length) in &runs {
                entry.add_sparse(offset, length);
            }
            self.runs = entry.sparse().iter().copied().collect();
            entry_size = realsize;
        }

        entry.set_size(Some(entry_size));
        self.body = Body::new(stored, body_padding);

        let (code, name) = if pending.pax_seen || !self.global.is_empty() {
            (FormatCode::TAR_PAX_INTERCHANGE, "POSIX pax interchange format")
        } else {
            match kind {
                Kind::Ustar => (FormatCode::TAR_USTAR, "POSIX ustar format"),
                Kind::Gnu => (FormatCode::TAR_GNUTAR, "GNU tar format"),
                Kind::V7 => (FormatCode::TAR, "tar (non-POSIX)"),
            }
        };
        r.set_format(code, name);

        match pending.warning.or(ext.warning) {
            Some(msg) => Ok(r.warn(msg)),
            None => Ok(Status::Ok),
        }
    }

    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        while let Some(run) = self.runs.front_mut() {
            if run.length == 0 {
                self.runs.pop_front();
                continue;
            }
            let max = usize::try_from(run.length).unwrap_or(usize::MAX);
            let data = r.take(max)?;
            if data.is_empty() {
                bail!(Error::truncated("tar entry data"));
            }
            let n = data.len() as u64;
            let block = Block {
                data,
                offset: run.offset,
            };
            run.offset += n;
            run.length -= n;
            self.body.remaining -= n;
            return Ok(Some(block));
        }
        self.body.read(r)
    }

    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        self.runs.clear();
        self.body.skip(r)
    }

    fn cleanup(&mut self) {
        self.global.clear();
    }
}

fn set_link(entry: &mut Entry, is_hardlink: bool, target: impl AsRef<[u8]>) {
    if is_hardlink {
        entry.set_hardlink(target);
    } else {
        entry.set_symlink(target);
    }
}

/// A Solaris ACL body: an octal ACL type, a NUL, then the ACL text.
fn apply_solaris_acl(entry: &mut Entry, body: &[u8], warning: &mut Option<String>) {
    const POSIX_DRAFT: u64 = 0o1000000;
    let end = body.find_byte(0).unwrap_or(body.len());
    let ty = parse_octal(&body[..end]);
    if ty != POSIX_DRAFT {
        warning.get_or_insert_with(|| format!("unsupported Solaris ACL type {ty:o}"));
        return;
    }
    let text = cstr(body.get(end + 1..).unwrap_or_default());
    if !entry.acl_parse_text(text, AclType::ACCESS) {
        warning.get_or_insert_with(|| "malformed Solaris ACL".into());
    }
}
