//! Decompression filters and their bidders.
//!
//! Every registered [`FilterBidder`] scores the first raw block by the number
//! of signature bits it verified. The highest score wins, ties go to the
//! earliest registration, and [`none`] always bids `1` so an uncompressed
//! stream is still accepted.
use std::{borrow::Cow, fmt};

use crate::{Error, Result, archive::Config, stream::Upstream};

pub mod bzip2;
pub mod compress;
pub mod gzip;
pub mod lz4;
pub mod none;
#[cfg(all(unix, feature = "program"))]
pub mod program;
pub mod xz;
pub mod zstd;

/// Identifies a decompression filter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterCode(pub u32);

impl_open_enum! {
    FilterCode;

    NONE = 0,
    GZIP = 1,
    BZIP2 = 2,
    /// Unix `compress`, aka. `.Z`.
    COMPRESS = 3,
    /// An external program.
    PROGRAM = 4,
    /// Legacy `.lzma` (lzma-alone).
    LZMA = 5,
    XZ = 6,
    LZ4 = 13,
    ZSTD = 14,
}

/// An active decompression stream.
///
/// It works like [`std::io::BufRead`]: [`Filter::fill`] exposes decoded bytes
/// without consuming them and [`Filter::consume`] advances past them.
pub trait Filter {
    fn name(&self) -> &'static str;

    fn code(&self) -> FilterCode;

    /// Return the decoded bytes available now, decoding more if none are
    /// buffered. An empty slice means end of stream.
    fn fill(&mut self) -> Result<&[u8]>;

    fn consume(&mut self, amt: usize);

    /// Skip up to `n` decoded bytes cheaply and return how many were skipped.
    /// Filters that cannot do better than decoding return `0` and the caller
    /// reads and discards instead.
    fn skip(&mut self, n: u64) -> Result<u64> {
        let _ = n;
        Ok(0)
    }

    /// Number of raw bytes consumed from the source.
    fn raw_position(&self) -> u64;

    /// Tear down the filter and close the source.
    fn close(&mut self) -> Result<()>;
}

/// Recognizes and instantiates one kind of [`Filter`].
pub trait FilterBidder {
    fn name(&self) -> &'static str;

    /// Registrations with an equal key are only kept once.
    fn key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.name())
    }

    /// Score `buf`, the first raw block, by the number of verified signature
    /// bits. Zero means "not mine".
    fn bid(&mut self, buf: &[u8]) -> u32;

    fn init<'a>(&self, upstream: Upstream<'a>, config: &Config) -> Result<Box<dyn Filter + 'a>>;
}

impl fmt::Debug for dyn FilterBidder + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterBidder").field(&self.key()).finish()
    }
}

/// Count verified signature bits over the available prefix of `buf`.
///
/// A short block that agrees with the signature so far still scores, so a
/// one-byte first block yields a low but nonzero confidence.
pub(crate) fn signature_bits(buf: &[u8], sig: &[u8]) -> u32 {
    let len = buf.len().min(sig.len());
    if buf[..len] == sig[..len] {
        len as u32 * 8
    } else {
        0
    }
}

/// Progress of one [`Codec::decode`] step.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Progress {
    pub consumed: usize,
    pub produced: usize,
    pub stream_end: bool,
}

/// An incremental decompressor, shared by filters and zip entries.
pub(crate) trait Codec {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress>;

    /// Called after [`Codec::decode`] reported the end of a stream. Returns
    /// whether another member follows and decoding should go on.
    fn next_member(&mut self, up: &mut Upstream<'_>) -> Result<bool> {
        let _ = up;
        Ok(false)
    }
}

const OUT_BUF_SIZE: usize = 64 << 10;

/// A [`Filter`] driving a [`Codec`] over an [`Upstream`].
pub(crate) struct CodecFilter<'a, C> {
    name: &'static str,
    code: FilterCode,
    up: Upstream<'a>,
    codec: C,
    out: Box<[u8]>,
    pos: usize,
    end: usize,
    done: bool,
}

impl<'a, C: Codec> CodecFilter<'a, C> {
    pub(crate) fn new(name: &'static str, code: FilterCode, up: Upstream<'a>, codec: C) -> Self {
        Self {
            name,
            code,
            up,
            codec,
            out: vec![0u8; OUT_BUF_SIZE].into_boxed_slice(),
            pos: 0,
            end: 0,
            done: false,
        }
    }
}

impl<C: Codec> Filter for CodecFilter<'_, C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn code(&self) -> FilterCode {
        self.code
    }

    fn fill(&mut self) -> Result<&[u8]> {
        while self.pos == self.end && !self.done {
            self.pos = 0;
            self.end = 0;
            let input = self.up.fill()?;
            let input_eof = input.is_empty();
            let p = self.codec.decode(input, &mut self.out)?;
            self.up.consume(p.consumed);
            self.end = p.produced;
            if p.stream_end {
                if !self.codec.next_member(&mut self.up)? {
                    trace!("{}: end of stream at raw offset {}", self.name, self.up.position());
                    self.done = true;
                }
            } else if p.consumed == 0 && p.produced == 0 {
                if input_eof {
                    bail!(Error::truncated("compressed stream"));
                }
                bail!(Error::decompress_msg(self.name, "decoder made no progress"));
            }
        }
        Ok(&self.out[self.pos..self.end])
    }

    fn consume(&mut self, amt: usize) {
        assert!(amt <= self.end - self.pos, "consume past decoded bytes");
        self.pos += amt;
    }

    fn raw_position(&self) -> u64 {
        self.up.position()
    }

    fn close(&mut self) -> Result<()> {
        self.up.close()?;
        Ok(())
    }
}

/// The bidders of all built-in filters, in registration order.
pub(crate) fn builtin_bidders() -> Vec<Box<dyn FilterBidder>> {
    vec![
        Box::new(bzip2::Bzip2Bidder),
        Box::new(compress::CompressBidder),
        Box::new(gzip::GzipBidder),
        Box::new(lz4::Lz4Bidder),
        Box::new(xz::LzmaBidder),
        Box::new(xz::XzBidder),
        Box::new(zstd::ZstdBidder),
        Box::new(none::NoneBidder),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_signature_scores() {
        assert_eq!(signature_bits(b"\x1f", b"\x1f\x8b\x08"), 8);
        assert_eq!(signature_bits(b"\x1f\x8b\x08\x00", b"\x1f\x8b\x08"), 24);
        assert_eq!(signature_bits(b"\x1f\x00", b"\x1f\x8b\x08"), 0);
        assert_eq!(signature_bits(b"", b"\x1f\x8b\x08"), 0);
    }
}
