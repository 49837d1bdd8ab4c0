//! The read-ahead buffering core.
//!
//! [`Upstream`] is the raw side: it walks the blocks of a [`Source`] and is
//! what decompression filters pull from. [`Stream`] is the decoded side every
//! format decoder reads through: [`Stream::read_ahead`] returns a window into
//! the filter's own output whenever the request fits in it, and only copies
//! into the reblocking buffer when it does not.
use std::{
    fmt,
    io::{self, BufRead, Read},
};

use crate::{
    Error, Result,
    filter::{Filter, FilterCode},
    source::Source,
};

/// Raw bytes from a [`Source`], with `BufRead`-like access.
pub struct Upstream<'a> {
    source: Box<dyn Source + 'a>,
    /// Offset of the next unconsumed byte in the current block.
    offset: usize,
    /// Length of the current block.
    len: usize,
    position: u64,
    eof: bool,
    closed: bool,
}

impl fmt::Debug for Upstream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("position", &self.position)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl<'a> Upstream<'a> {
    pub(crate) fn new(source: Box<dyn Source + 'a>) -> Self {
        Self {
            source,
            offset: 0,
            len: 0,
            position: 0,
            eof: false,
            closed: false,
        }
    }

    /// Return the unconsumed part of the current block, fetching a new block
    /// if it is exhausted. An empty slice means end of input.
    pub fn fill(&mut self) -> io::Result<&[u8]> {
        if self.offset == self.len && !self.eof {
            let len = self.source.read()?;
            self.offset = 0;
            self.len = len.min(self.source.block().len());
            if self.len == 0 {
                self.eof = true;
            }
        }
        Ok(&self.source.block()[self.offset..self.len])
    }

    pub fn consume(&mut self, amt: usize) {
        assert!(amt <= self.len - self.offset, "consume past the current block");
        self.offset += amt;
        self.position += amt as u64;
    }

    /// Skip up to `n` bytes, preferring the source's own skip. Returns the
    /// number of bytes skipped, which is less than `n` only at end of input.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut rest = n;
        let in_block = ((self.len - self.offset) as u64).min(rest);
        self.consume(in_block as usize);
        rest -= in_block;

        if rest > 0 && !self.eof {
            let skipped = self.source.skip(rest)?.min(rest);
            self.position += skipped;
            rest -= skipped;
        }

        while rest > 0 {
            let avail = self.fill()?.len();
            if avail == 0 {
                break;
            }
            let amt = (avail as u64).min(rest) as usize;
            self.consume(amt);
            rest -= amt as u64;
        }
        Ok(n - rest)
    }

    /// Read until `buf` is full or the input ends, returning the length read.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut len = 0;
        while len < buf.len() {
            match Read::read(self, &mut buf[len..])? {
                0 => break,
                n => len += n,
            }
        }
        Ok(len)
    }

    /// Total raw bytes consumed.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.offset == self.len
    }

    pub(crate) fn open(&mut self) -> io::Result<()> {
        self.source.open()
    }

    pub fn close(&mut self) -> io::Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.source.close()
    }
}

impl Read for Upstream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let src = self.fill()?;
        let len = src.len().min(buf.len());
        buf[..len].copy_from_slice(&src[..len]);
        self.consume(len);
        Ok(len)
    }
}

impl BufRead for Upstream<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.fill()
    }

    fn consume(&mut self, amt: usize) {
        Upstream::consume(self, amt);
    }
}

/// The decoded byte stream shared by format decoders.
pub struct Stream<'a> {
    filter: Box<dyn Filter + 'a>,
    /// Reblocking buffer. Bytes here were already consumed from the filter and
    /// logically precede whatever the filter returns next.
    copy: Vec<u8>,
    copy_pos: usize,
    /// Bytes handed out by [`Stream::take`], consumed at the next operation.
    deferred: usize,
    position: u64,
}

impl fmt::Debug for Stream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("filter", &self.filter.name())
            .field("copied", &(self.copy.len() - self.copy_pos))
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

impl<'a> Stream<'a> {
    pub(crate) fn new(filter: Box<dyn Filter + 'a>) -> Self {
        Self {
            filter,
            copy: Vec::new(),
            copy_pos: 0,
            deferred: 0,
            position: 0,
        }
    }

    pub fn filter_name(&self) -> &'static str {
        self.filter.name()
    }

    pub fn filter_code(&self) -> FilterCode {
        self.filter.code()
    }

    fn copied(&self) -> usize {
        self.copy.len() - self.copy_pos
    }

    fn settle(&mut self) {
        if self.deferred != 0 {
            let n = std::mem::take(&mut self.deferred);
            self.consume(n);
        }
    }

    /// Peek at least `min` bytes without consuming them.
    ///
    /// Fewer bytes are returned only at the end of the stream, an empty slice
    /// means nothing is left. The returned bytes stay the same until
    /// [`Stream::consume`] is called, so repeating the call is idempotent.
    pub fn read_ahead(&mut self, min: usize) -> Result<&[u8]> {
        self.settle();

        if self.copied() == 0 {
            self.copy.clear();
            self.copy_pos = 0;
            let avail = self.filter.fill()?.len();
            if avail >= min || avail == 0 {
                return self.filter.fill();
            }
        } else if self.copied() >= min {
            return Ok(&self.copy[self.copy_pos..]);
        }

        // The request straddles filter blocks, gather it in the copy buffer.
        if self.copy_pos != 0 {
            self.copy.drain(..self.copy_pos);
            self.copy_pos = 0;
        }
        self.copy.reserve(min - self.copy.len());
        while self.copy.len() < min {
            let buf = self.filter.fill()?;
            if buf.is_empty() {
                break;
            }
            let amt = buf.len().min(min - self.copy.len());
            self.copy.extend_from_slice(&buf[..amt]);
            self.filter.consume(amt);
        }
        Ok(&self.copy)
    }

    /// Consume `n` bytes. `n` must not exceed the length of the last
    /// [`Stream::read_ahead`] result.
    pub fn consume(&mut self, n: usize) {
        self.settle();
        let copied = self.copied();
        if copied != 0 {
            assert!(n <= copied, "consume past the read-ahead window");
            self.copy_pos += n;
        } else {
            self.filter.consume(n);
        }
        self.position += n as u64;
    }

    /// Return up to `max` bytes which are consumed automatically at the next
    /// stream operation. An empty slice means end of stream.
    pub fn take(&mut self, max: usize) -> Result<&[u8]> {
        self.settle();
        let avail = self.read_ahead(1)?.len().min(max);
        self.deferred = avail;
        let buf = if self.copied() != 0 {
            &self.copy[self.copy_pos..]
        } else {
            self.filter.fill()?
        };
        Ok(&buf[..avail])
    }

    /// Skip exactly `n` bytes or fail.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.settle();
        let mut rest = n;

        let copied = (self.copied() as u64).min(rest);
        self.copy_pos += copied as usize;
        self.position += copied;
        rest -= copied;
        if rest == 0 {
            return Ok(());
        }

        let skipped = self.filter.skip(rest)?.min(rest);
        self.position += skipped;
        rest -= skipped;

        while rest > 0 {
            let avail = self.filter.fill()?.len();
            if avail == 0 {
                bail!(Error::truncated("input while skipping"));
            }
            let amt = (avail as u64).min(rest) as usize;
            self.filter.consume(amt);
            self.position += amt as u64;
            rest -= amt as u64;
        }
        Ok(())
    }

    /// Logical position in the decoded stream.
    pub fn position(&self) -> u64 {
        self.position + self.deferred as u64
    }

    /// Position in the raw, still compressed, input.
    pub fn raw_position(&self) -> u64 {
        self.filter.raw_position()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.filter.close()
    }
}

#[cfg(test)]
impl<'a> Stream<'a> {
    /// An uncompressed stream over `data`.
    pub(crate) fn for_test(data: &'a [u8]) -> Self {
        use crate::filter::FilterBidder;

        let up = Upstream::new(Box::new(crate::source::MemorySource::new(data)));
        let filter = crate::filter::none::NoneBidder
            .init(up, &crate::Config::default())
            .unwrap();
        Self::new(filter)
    }
}
