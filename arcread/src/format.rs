//! Container format decoders and the interface they read through.
//!
//! Every registered [`Format`] bids on the decoded stream, looking ahead as
//! far as it needs without consuming anything. The highest bid wins and is
//! kept for the rest of the archive. The decoder then turns headers into
//! [`Entry`] values and serves each entry body as a sequence of [`Block`]s.
use std::fmt;

use crate::{
    Entry, Error, Result, Status,
    archive::Config,
    error::ErrorInner,
    filter::FilterCode,
    stream::Stream,
};

pub mod ar;
pub mod cpio;
pub mod empty;
pub mod iso9660;
pub mod mtree;
pub mod raw;
pub mod tar;
pub mod zip;

/// Identifies a container format, the low 16 bits name a variant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatCode(pub u32);

impl_open_enum! {
    FormatCode;

    CPIO = 0x10000,
    /// Portable ASCII (odc), magic `070707`.
    CPIO_POSIX = 0x10001,
    CPIO_BIN_LE = 0x10002,
    CPIO_BIN_BE = 0x10003,
    /// SVR4 (newc), magic `070701`.
    CPIO_SVR4_NOCRC = 0x10004,
    /// SVR4 with checksum, magic `070702`.
    CPIO_SVR4_CRC = 0x10005,
    TAR = 0x30000,
    TAR_USTAR = 0x30001,
    TAR_PAX_INTERCHANGE = 0x30002,
    TAR_PAX_RESTRICTED = 0x30003,
    TAR_GNUTAR = 0x30004,
    ISO9660 = 0x40000,
    ISO9660_ROCKRIDGE = 0x40001,
    ZIP = 0x50000,
    EMPTY = 0x60000,
    AR = 0x70000,
    AR_GNU = 0x70001,
    AR_BSD = 0x70002,
    MTREE = 0x80000,
    RAW = 0x90000,
}

impl FormatCode {
    /// The format family with the variant bits cleared.
    pub fn base(self) -> Self {
        Self(self.0 & !0xFFFF)
    }
}

/// A piece of an entry body.
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    pub data: &'a [u8],
    /// Offset of `data` within the entry. For sparse entries the gaps between
    /// blocks are holes.
    pub offset: u64,
}

/// A container format decoder.
///
/// The archive handle drives a decoder through the header/body protocol:
/// [`Format::read_header`] fills the next entry, then either
/// [`Format::read_data`] is called until it returns `None` or
/// [`Format::read_data_skip`] discards the rest of the body.
pub trait Format {
    fn name(&self) -> &'static str;

    /// Score the decoded stream without consuming it. `best_bid` is the
    /// highest bid so far; a decoder whose maximum cannot beat it may return
    /// early.
    fn bid(&mut self, r: &mut Reader<'_>, best_bid: u32) -> Result<u32>;

    /// Parse the next header into `entry`, which was cleared beforehand.
    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status>;

    /// Return the next piece of the current entry body, or `None` after the
    /// last one.
    ///
    /// A problem found after all data was delivered, e.g. a checksum
    /// mismatch, is reported as an error of [`Severity::Warn`][crate::Severity::Warn],
    /// after which the body counts as finished.
    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>>;

    /// Discard the rest of the current entry body.
    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()>;

    /// Release per-archive state.
    fn cleanup(&mut self) {}
}

impl fmt::Debug for dyn Format + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Format").field(&self.name()).finish()
    }
}

/// The decoded stream as seen by a [`Format`].
pub struct Reader<'a> {
    stream: Stream<'a>,
    config: Config,
    format_code: FormatCode,
    format_name: &'static str,
    warning: Option<String>,
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("stream", &self.stream)
            .field("format_code", &self.format_code)
            .finish_non_exhaustive()
    }
}

impl<'a> Reader<'a> {
    pub(crate) fn new(stream: Stream<'a>, config: Config) -> Self {
        Self {
            stream,
            config,
            format_code: FormatCode(0),
            format_name: "",
            warning: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// See [`Stream::read_ahead`].
    pub fn read_ahead(&mut self, min: usize) -> Result<&[u8]> {
        self.stream.read_ahead(min)
    }

    /// Peek exactly `len` bytes, failing if the stream ends first.
    pub fn require(&mut self, len: usize, what: &'static str) -> Result<&[u8]> {
        let buf = self.stream.read_ahead(len)?;
        if buf.len() < len {
            bail!(Error::truncated(what));
        }
        Ok(&buf[..len])
    }

    pub fn consume(&mut self, n: usize) {
        self.stream.consume(n);
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.stream.skip(n)
    }

    /// See [`Stream::take`].
    pub fn take(&mut self, max: usize) -> Result<&[u8]> {
        self.stream.take(max)
    }

    /// Position in the decoded stream.
    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    pub fn raw_position(&self) -> u64 {
        self.stream.raw_position()
    }

    pub fn filter_name(&self) -> &'static str {
        self.stream.filter_name()
    }

    pub fn filter_code(&self) -> FilterCode {
        self.stream.filter_code()
    }

    pub fn format_code(&self) -> FormatCode {
        self.format_code
    }

    pub fn format_name(&self) -> &'static str {
        self.format_name
    }

    /// Refine the reported format, e.g. once a header reveals the variant.
    pub fn set_format(&mut self, code: FormatCode, name: &'static str) {
        self.format_code = code;
        self.format_name = name;
    }

    /// Record a recovered anomaly for the current header and return
    /// [`Status::Warn`].
    pub fn warn(&mut self, msg: impl Into<String>) -> Status {
        let msg = msg.into();
        warn!("{}: {msg}", self.format_name);
        self.warning = Some(msg);
        Status::Warn
    }

    pub(crate) fn take_warning(&mut self) -> Option<String> {
        self.warning.take()
    }

    pub(crate) fn stream_mut(&mut self) -> &mut Stream<'a> {
        &mut self.stream
    }

    #[cfg(test)]
    pub(crate) fn for_test(data: &'a [u8]) -> Self {
        Self::new(Stream::for_test(data), Config::default())
    }
}

/// The remaining body of an entry stored contiguously, followed by padding.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Body {
    pub offset: u64,
    pub remaining: u64,
    pub padding: u64,
}

impl Body {
    pub fn new(size: u64, padding: u64) -> Self {
        Self {
            offset: 0,
            remaining: size,
            padding,
        }
    }

    pub fn read<'s>(&mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        if self.remaining == 0 {
            if self.padding != 0 {
                r.skip(std::mem::take(&mut self.padding))?;
            }
            return Ok(None);
        }
        let max = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let data = r.take(max)?;
        if data.is_empty() {
            bail!(Error::truncated("entry data"));
        }
        let block = Block {
            data,
            offset: self.offset,
        };
        self.offset += data.len() as u64;
        self.remaining -= data.len() as u64;
        Ok(Some(block))
    }

    pub fn skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        let n = self.remaining + self.padding;
        self.offset += self.remaining;
        self.remaining = 0;
        self.padding = 0;
        r.skip(n)
    }
}

pub(crate) trait OptionExt<T> {
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    #[inline]
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(ErrorInner::Fatal(msg.to_owned()).into()),
        }
    }
}

/// Pad `len` up to a multiple of `align`, which is a power of two.
pub(crate) fn padding(len: u64, align: u64) -> u64 {
    len.wrapping_neg() & (align - 1)
}

/// Days from 1970-01-01 to the given proleptic Gregorian date.
pub(crate) fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let (m, d) = (i64::from(m), i64::from(d));
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// The decoders [`ReadArchive::support_format_all`][crate::ReadArchive::support_format_all]
/// registers, in registration order. `raw` is never part of it.
pub(crate) fn builtin_formats() -> Vec<Box<dyn Format>> {
    vec![
        Box::new(ar::Ar::default()),
        Box::new(cpio::Cpio::default()),
        Box::new(empty::Empty),
        Box::new(iso9660::Iso9660::default()),
        Box::new(mtree::Mtree::default()),
        Box::new(tar::Tar::default()),
        Box::new(zip::Zip::default()),
    ]
}
