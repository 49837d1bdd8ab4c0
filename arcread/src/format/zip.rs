//! zip, read front to back through the local file headers.
//!
//! The central directory at the end of the archive is never consulted: it is
//! out of reach for a stream, and reaching it marks the end of entries. Entries
//! written with sizes deferred to a trailing data descriptor are delimited by
//! the decompressor, or for stored entries by scanning for the descriptor.
use std::fmt;

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, little_endian as le};

use super::{Block, Format, FormatCode, Reader, days_from_civil};
use crate::{
    Entry, Error, Result, Status,
    entry::{FileType, Timestamp},
    filter::Codec,
};

const LOCAL_SIG: &[u8; 4] = b"PK\x03\x04";
const DESCRIPTOR_SIG: &[u8; 4] = b"PK\x07\x08";

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_LENGTH_AT_END: u16 = 1 << 3;
const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;

const EXTRA_ZIP64: u16 = 0x0001;
const EXTRA_TIMESTAMP: u16 = 0x5455;
const EXTRA_UNIX_OLD: u16 = 0x5855;
const EXTRA_UNIX_NEW: u16 = 0x7855;
const EXTRA_UNIX_3: u16 = 0x7875;

const OUT_BUF_SIZE: usize = 64 << 10;

#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct LocalHeader {
    signature: [u8; 4],
    version: le::U16,
    flags: le::U16,
    method: le::U16,
    dos_time: le::U16,
    dos_date: le::U16,
    crc32: le::U32,
    compressed_size: le::U32,
    uncompressed_size: le::U32,
    name_len: le::U16,
    extra_len: le::U16,
}

const _: () = assert!(size_of::<LocalHeader>() == 30);

impl fmt::Debug for LocalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHeader")
            .field("version", &self.version.get())
            .field("flags", &format_args!("{:#06x}", self.flags.get()))
            .field("method", &self.method.get())
            .field("crc32", &format_args!("{:#010x}", self.crc32.get()))
            .field("compressed_size", &self.compressed_size.get())
            .field("uncompressed_size", &self.uncompressed_size.get())
            .finish_non_exhaustive()
    }
}

/// Convert an MS-DOS date and time, taken as UTC, to Unix seconds.
fn dos_time(date: u16, time: u16) -> i64 {
    let year = 1980 + i64::from(date >> 9);
    let month = u32::from((date >> 5) & 0xF).clamp(1, 12);
    let day = u32::from(date & 0x1F).max(1);
    let (hour, min, sec) = (
        i64::from(time >> 11),
        i64::from((time >> 5) & 0x3F),
        i64::from(time & 0x1F) * 2,
    );
    days_from_civil(year, month, day) * 86400 + hour * 3600 + min * 60 + sec
}

/// Little-endian integer of up to 8 bytes.
fn le_uint(b: &[u8]) -> u64 {
    b.iter().rev().fold(0, |acc, &x| (acc << 8) | u64::from(x))
}

enum Method {
    Stored,
    Compressed(Box<dyn Codec>),
    /// The body cannot be read, with the reason.
    Unreadable(String),
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored => f.write_str("Stored"),
            Self::Compressed(_) => f.write_str("Compressed"),
            Self::Unreadable(why) => f.debug_tuple("Unreadable").field(why).finish(),
        }
    }
}

fn method_decoder(method: u16) -> Method {
    match method {
        0 => Method::Stored,
        #[cfg(feature = "gzip")]
        8 => Method::Compressed(Box::new(crate::filter::gzip::Inflate::new())),
        #[cfg(not(feature = "gzip"))]
        8 => Method::Unreadable("deflate support requires feature `gzip`".into()),
        #[cfg(feature = "bzip2")]
        12 => Method::Compressed(Box::new(crate::filter::bzip2::Bzip2Codec::new())),
        #[cfg(not(feature = "bzip2"))]
        12 => Method::Unreadable("bzip2 support requires feature `bzip2`".into()),
        #[cfg(feature = "xz")]
        95 => match crate::filter::xz::LzmaCodec::new_xz() {
            Ok(codec) => Method::Compressed(Box::new(codec)),
            Err(err) => Method::Unreadable(err.to_string()),
        },
        #[cfg(not(feature = "xz"))]
        95 => Method::Unreadable("xz support requires feature `xz`".into()),
        m => Method::Unreadable(format!("unsupported zip compression method {m}")),
    }
}

fn method_name(method: u16) -> &'static str {
    match method {
        0 => "ZIP 1.0 (uncompressed)",
        8 => "ZIP 2.0 (deflation)",
        12 => "ZIP (bzip2)",
        95 => "ZIP (xz)",
        _ => "ZIP",
    }
}

/// State of the entry being read.
#[derive(Debug)]
struct Current {
    method: Method,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    length_at_end: bool,
    /// Sizes are known upfront, from the header or its zip64 extra field.
    sizes_known: bool,
    zip64: bool,
    /// Compressed bytes consumed so far.
    consumed: u64,
    /// Uncompressed bytes produced so far.
    produced: u64,
    hasher: crc32fast::Hasher,
    /// The decoder reported the end of the data.
    decoded: bool,
    /// The trailing descriptor, if any, was read and sizes were checked.
    finished: bool,
}

impl Current {
    /// Read the data descriptor if there is one, then compare sizes and CRC.
    fn finish(&mut self, r: &mut Reader<'_>) -> Result<()> {
        self.finished = true;
        if self.length_at_end {
            self.read_descriptor(r)?;
        }
        if self.consumed != self.compressed_size {
            bail!(Error::warn(format!(
                "zip compressed size mismatch: header says {}, read {}",
                self.compressed_size, self.consumed,
            )));
        }
        // Sizes past 4 GiB without zip64 wrap around in the wild.
        if self.produced as u32 != self.uncompressed_size as u32 {
            bail!(Error::warn(format!(
                "zip uncompressed size mismatch: header says {}, got {}",
                self.uncompressed_size, self.produced,
            )));
        }
        let crc = self.hasher.clone().finalize();
        if r.config().verify_crc && crc != self.crc32 {
            bail!(Error::warn(format!(
                "zip CRC-32 mismatch: header says {:#010x}, got {crc:#010x}",
                self.crc32,
            )));
        }
        Ok(())
    }

    fn read_descriptor(&mut self, r: &mut Reader<'_>) -> Result<()> {
        let size_len = if self.zip64 { 8 } else { 4 };
        let buf = r.read_ahead(8 + 2 * size_len)?;
        // The signature is optional.
        let off = if buf.starts_with(DESCRIPTOR_SIG) { 4 } else { 0 };
        let len = off + 4 + 2 * size_len;
        if buf.len() < len {
            bail!(Error::truncated("zip data descriptor"));
        }
        let b = &buf[off..len];
        self.crc32 = le_uint(&b[..4]) as u32;
        self.compressed_size = le_uint(&b[4..4 + size_len]);
        self.uncompressed_size = le_uint(&b[4 + size_len..]);
        r.consume(len);
        Ok(())
    }

    fn record(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.produced += data.len() as u64;
    }
}

#[derive(Default)]
pub struct Zip {
    cur: Option<Current>,
    out: Vec<u8>,
}

impl fmt::Debug for Zip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zip").field("cur", &self.cur).finish_non_exhaustive()
    }
}

impl Zip {
    /// Stored data whose length is only given by the trailing descriptor.
    ///
    /// Returns how many buffered bytes can be delivered, and whether they are
    /// followed by a descriptor whose CRC and size fields agree with the data
    /// before it. Bytes that may start a descriptor which is not buffered in
    /// full yet are held back.
    fn scan_stored_unknown(cur: &Current, r: &mut Reader<'_>) -> Result<(usize, bool)> {
        let size_len = if cur.zip64 { 8 } else { 4 };
        let desc_len = 8 + 2 * size_len;
        // Stay on the filter's own blocks unless the window is too short.
        let want = if r.read_ahead(1)?.len() < desc_len { desc_len } else { 1 };
        let buf = r.read_ahead(want)?;
        if buf.len() < desc_len {
            bail!(Error::truncated("zip entry data"));
        }

        let mut hasher = cur.hasher.clone();
        let mut hashed = 0;
        for i in 0..buf.len() {
            let tail = &buf[i..];
            if !tail.starts_with(DESCRIPTOR_SIG) {
                if tail.len() < DESCRIPTOR_SIG.len() && DESCRIPTOR_SIG.starts_with(tail) {
                    return Ok((i, false));
                }
                continue;
            }
            if tail.len() < desc_len {
                return Ok((i, false));
            }
            hasher.update(&buf[hashed..i]);
            hashed = i;
            let crc = le_uint(&tail[4..8]) as u32;
            let size = le_uint(&tail[8..8 + size_len]);
            if crc == hasher.clone().finalize() && size == cur.consumed + i as u64 {
                return Ok((i, true));
            }
        }
        Ok((buf.len(), false))
    }
}

impl Format for Zip {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        let buf = r.read_ahead(4)?;
        Ok(match buf.get(..4) {
            Some(b"PK\x03\x04" | b"PK\x05\x06" | b"PK\x06\x06" | b"PK00") => 30,
            Some(b"PK\x07\x08") if buf.get(4..8) == Some(&LOCAL_SIG[..]) => 30,
            _ => 0,
        })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        self.cur = None;

        let mut skipped = 0u64;
        loop {
            let buf = r.read_ahead(4)?;
            if buf.len() < 4 {
                if buf.is_empty() {
                    return Ok(Status::Eof);
                }
                bail!(Error::truncated("zip header"));
            }
            match &buf[..4] {
                b"PK\x03\x04" => break,
                // Central directory or end records, no more entries.
                b"PK\x01\x02" | b"PK\x05\x06" | b"PK\x06\x06" | b"PK\x06\x07" => {
                    return Ok(Status::Eof);
                }
                // Markers of split archives.
                b"PK\x07\x08" | b"PK00" => r.consume(4),
                _ => {
                    let n = buf
                        .windows(4)
                        .skip(1)
                        .position(|w| w.starts_with(b"PK"))
                        .map_or(buf.len() - 3, |i| i + 1);
                    r.consume(n);
                    skipped += n as u64;
                }
            }
        }

        let mut h = LocalHeader::new_zeroed();
        h.as_mut_bytes()
            .copy_from_slice(r.require(size_of::<LocalHeader>(), "zip local header")?);
        r.consume(size_of::<LocalHeader>());
        trace!("zip {h:?}");

        let (name_len, extra_len) = (usize::from(h.name_len.get()), usize::from(h.extra_len.get()));
        let name = r.require(name_len, "zip file name")?;
        entry.set_pathname(name);
        r.consume(name_len);
        let extra = r.require(extra_len, "zip extra field")?.to_vec();
        r.consume(extra_len);

        let flags = h.flags.get();
        let method = h.method.get();
        r.set_format(FormatCode::ZIP, method_name(method));

        let is_dir = entry.pathname().ends_with(b"/");
        if is_dir {
            entry.set_mode(FileType::Directory.to_mode_bits() | 0o755);
        } else {
            entry.set_mode(FileType::Regular.to_mode_bits() | 0o644);
        }
        entry.set_mtime(Some(Timestamp::new(
            dos_time(h.dos_date.get(), h.dos_time.get()),
            0,
        )));

        let length_at_end = flags & FLAG_LENGTH_AT_END != 0;
        let mut cur = Current {
            method: Method::Stored,
            crc32: h.crc32.get(),
            compressed_size: h.compressed_size.get().into(),
            uncompressed_size: h.uncompressed_size.get().into(),
            length_at_end,
            sizes_known: false,
            zip64: false,
            consumed: 0,
            produced: 0,
            hasher: crc32fast::Hasher::new(),
            decoded: false,
            finished: false,
        };
        let warning = parse_extra(&extra, &mut cur, entry);

        cur.sizes_known = !length_at_end || cur.compressed_size != 0;
        if !length_at_end || cur.uncompressed_size != 0 {
            entry.set_size(Some(cur.uncompressed_size));
        }
        if is_dir && entry.size().is_none() {
            entry.set_size(Some(0));
        }

        cur.method = if flags & (FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION) != 0 {
            entry.set_encrypted(true);
            Method::Unreadable("encrypted zip entries are not supported".into())
        } else {
            method_decoder(method)
        };
        if matches!(cur.method, Method::Compressed(_)) && self.out.is_empty() {
            self.out = vec![0; OUT_BUF_SIZE];
        }
        self.cur = Some(cur);

        if let Some(msg) = warning {
            return Ok(r.warn(msg));
        }
        if skipped != 0 {
            return Ok(r.warn(format!("skipped {skipped} bytes before zip header")));
        }
        Ok(Status::Ok)
    }

    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        let cur = self.cur.as_mut().expect("read_data after a header");
        if cur.finished {
            return Ok(None);
        }

        match &mut cur.method {
            Method::Unreadable(why) => bail!(Error::failed(why.clone())),
            Method::Stored if !cur.sizes_known => {
                if !cur.decoded {
                    let (n, found) = Self::scan_stored_unknown(cur, r)?;
                    if found {
                        cur.decoded = true;
                    }
                    if n != 0 {
                        let offset = cur.produced;
                        let data = r.take(n)?;
                        cur.consumed += n as u64;
                        cur.record(data);
                        return Ok(Some(Block { data, offset }));
                    }
                }
            }
            Method::Stored => {
                let remaining = cur.compressed_size - cur.consumed;
                if remaining != 0 {
                    let offset = cur.produced;
                    let data = r.take(usize::try_from(remaining).unwrap_or(usize::MAX))?;
                    if data.is_empty() {
                        bail!(Error::truncated("zip entry data"));
                    }
                    cur.consumed += data.len() as u64;
                    cur.record(data);
                    return Ok(Some(Block { data, offset }));
                }
            }
            Method::Compressed(codec) => {
                while !cur.decoded {
                    let limit = if cur.sizes_known {
                        cur.compressed_size.saturating_sub(cur.consumed)
                    } else {
                        u64::MAX
                    };
                    let input = r.read_ahead(1)?;
                    let input_eof = input.is_empty();
                    let input =
                        &input[..input.len().min(usize::try_from(limit).unwrap_or(usize::MAX))];
                    let exhausted = input.is_empty();
                    let p = codec.decode(input, &mut self.out)?;
                    r.consume(p.consumed);
                    cur.consumed += p.consumed as u64;
                    if p.stream_end {
                        cur.decoded = true;
                    }
                    if p.produced != 0 {
                        let offset = cur.produced;
                        let data = &self.out[..p.produced];
                        cur.hasher.update(data);
                        cur.produced += data.len() as u64;
                        return Ok(Some(Block { data, offset }));
                    }
                    if p.consumed == 0 && !p.stream_end {
                        if exhausted && (input_eof || cur.sizes_known) {
                            bail!(Error::truncated("zip entry data"));
                        }
                        bail!(Error::decompress_msg("zip", "decoder made no progress"));
                    }
                }
            }
        }
        cur.finish(r)?;
        Ok(None)
    }

    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        let Some(cur) = self.cur.as_mut() else {
            return Ok(());
        };
        if cur.finished {
            return Ok(());
        }
        if cur.sizes_known {
            r.skip(cur.compressed_size.saturating_sub(cur.consumed))?;
            cur.finished = true;
            if cur.length_at_end {
                cur.read_descriptor(r)?;
            }
            return Ok(());
        }
        if let Method::Unreadable(why) = &cur.method {
            bail!(Error::fatal(format!(
                "cannot skip zip entry of unknown length: {why}"
            )));
        }
        loop {
            match self.read_data(r) {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(()),
                Err(err) if err.severity() == crate::Severity::Warn => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    fn cleanup(&mut self) {
        self.cur = None;
        self.out = Vec::new();
    }
}

/// Apply the extra field records. Returns a warning for malformed records.
fn parse_extra(mut extra: &[u8], cur: &mut Current, entry: &mut Entry) -> Option<String> {
    while !extra.is_empty() {
        if extra.len() < 4 {
            return Some("truncated zip extra field".into());
        }
        let id = le_uint(&extra[..2]) as u16;
        let len = le_uint(&extra[2..4]) as usize;
        let Some(data) = extra.get(4..4 + len) else {
            return Some(format!("zip extra field {id:#06x} overruns its area"));
        };
        extra = &extra[4 + len..];

        match id {
            EXTRA_ZIP64 => {
                // Only the fields saturated in the header are present.
                let mut d = data;
                let mut next = || {
                    let v = d.get(..8).map(le_uint);
                    d = d.get(8..).unwrap_or_default();
                    v
                };
                if cur.uncompressed_size == u64::from(u32::MAX) {
                    match next() {
                        Some(v) => cur.uncompressed_size = v,
                        None => return Some("truncated zip64 extra field".into()),
                    }
                }
                if cur.compressed_size == u64::from(u32::MAX) {
                    match next() {
                        Some(v) => cur.compressed_size = v,
                        None => return Some("truncated zip64 extra field".into()),
                    }
                }
                cur.zip64 = true;
            }
            EXTRA_TIMESTAMP => {
                let Some((&flags, mut d)) = data.split_first() else {
                    continue;
                };
                let mut next = || {
                    let v = d.get(..4).map(|b| le_uint(b) as u32 as i32);
                    d = d.get(4..).unwrap_or_default();
                    v
                };
                let setters: [fn(&mut Entry, Option<Timestamp>); 3] =
                    [Entry::set_mtime, Entry::set_atime, Entry::set_ctime];
                for (bit, set) in setters.into_iter().enumerate() {
                    if flags & (1 << bit) != 0 {
                        if let Some(t) = next() {
                            set(entry, Some(Timestamp::new(t.into(), 0)));
                        }
                    }
                }
            }
            EXTRA_UNIX_OLD => {
                if data.len() >= 8 {
                    let atime = le_uint(&data[..4]) as u32 as i32;
                    let mtime = le_uint(&data[4..8]) as u32 as i32;
                    entry.set_atime(Some(Timestamp::new(atime.into(), 0)));
                    entry.set_mtime(Some(Timestamp::new(mtime.into(), 0)));
                }
                if data.len() >= 12 {
                    entry.set_uid(le_uint(&data[8..10]));
                    entry.set_gid(le_uint(&data[10..12]));
                }
            }
            EXTRA_UNIX_NEW => {
                if data.len() >= 4 {
                    entry.set_uid(le_uint(&data[..2]));
                    entry.set_gid(le_uint(&data[2..4]));
                }
            }
            EXTRA_UNIX_3 => {
                // Version 1: uid size, uid, gid size, gid.
                if data.first() != Some(&1) {
                    continue;
                }
                let d = &data[1..];
                let uid_len = d.first().map_or(0, |&n| usize::from(n));
                let Some(uid) = d.get(1..1 + uid_len) else {
                    return Some("truncated zip unix extra field".into());
                };
                let d = &d[1 + uid_len..];
                let gid_len = d.first().map_or(0, |&n| usize::from(n));
                let Some(gid) = d.get(1..1 + gid_len) else {
                    return Some("truncated zip unix extra field".into());
                };
                if uid_len <= 8 && gid_len <= 8 {
                    entry.set_uid(le_uint(uid));
                    entry.set_gid(le_uint(gid));
                }
            }
            _ => {}
        }
    }
    None
}
