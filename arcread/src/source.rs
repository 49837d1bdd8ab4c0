//! Client byte sources.
//!
//! A [`Source`] hands out raw bytes one block at a time. The archive never
//! touches files or sockets directly, it only calls these four methods.
use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

/// The I/O callbacks driving an archive.
pub trait Source {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Fetch the next block and return its length. Zero means end of input.
    ///
    /// The block is then available from [`Source::block`] until the next call.
    fn read(&mut self) -> io::Result<usize>;

    /// The block fetched by the last [`Source::read`].
    fn block(&self) -> &[u8];

    /// Skip up to `n` bytes past the current block and return the number of
    /// bytes actually skipped. Returning less, including zero, is always
    /// allowed. The caller reads and discards the rest.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let _ = n;
        Ok(0)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory archive, served as one block without copying.
pub struct MemorySource<'a> {
    data: &'a [u8],
    consumed: bool,
}

impl fmt::Debug for MemorySource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("len", &self.data.len())
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl<'a> MemorySource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            consumed: false,
        }
    }
}

impl Source for MemorySource<'_> {
    fn read(&mut self) -> io::Result<usize> {
        if self.consumed {
            return Ok(0);
        }
        self.consumed = true;
        Ok(self.data.len())
    }

    fn block(&self) -> &[u8] {
        if self.consumed { self.data } else { &[] }
    }
}

/// A [`Read`] stream read in fixed-size blocks. Skipping is not supported.
#[derive(Debug)]
pub struct ReaderSource<R> {
    rdr: R,
    buf: Box<[u8]>,
    len: usize,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(rdr: R, block_size: usize) -> Self {
        Self {
            rdr,
            buf: vec![0u8; block_size.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.rdr
    }
}

fn read_retrying(rdr: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match rdr.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            ret => return ret,
        }
    }
}

impl<R: Read> Source for ReaderSource<R> {
    fn read(&mut self) -> io::Result<usize> {
        self.len = read_retrying(&mut self.rdr, &mut self.buf)?;
        Ok(self.len)
    }

    fn block(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// A seekable stream, typically a [`std::fs::File`]. Skips become seeks.
#[derive(Debug)]
pub struct SeekableSource<R> {
    inner: ReaderSource<R>,
    /// Bytes not yet read, or `None` if the length is not known yet.
    remaining: Option<u64>,
}

impl<R: Read + Seek> SeekableSource<R> {
    pub fn new(rdr: R, block_size: usize) -> Self {
        Self {
            inner: ReaderSource::new(rdr, block_size),
            remaining: None,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> Source for SeekableSource<R> {
    fn open(&mut self) -> io::Result<()> {
        let rdr = &mut self.inner.rdr;
        let cur = rdr.stream_position()?;
        let end = rdr.seek(SeekFrom::End(0))?;
        rdr.seek(SeekFrom::Start(cur))?;
        self.remaining = Some(end.saturating_sub(cur));
        Ok(())
    }

    fn read(&mut self) -> io::Result<usize> {
        let len = self.inner.read()?;
        if let Some(rest) = &mut self.remaining {
            *rest = rest.saturating_sub(len as u64);
        }
        Ok(len)
    }

    fn block(&self) -> &[u8] {
        self.inner.block()
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        // Seeking past the end would silently succeed, so clamp to the length.
        let Some(rest) = &mut self.remaining else {
            return Ok(0);
        };
        let n = n.min(*rest).min(i64::MAX as u64);
        self.inner.rdr.seek(SeekFrom::Current(n as i64))?;
        *rest -= n;
        self.inner.len = 0;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_one_block() {
        let data = b"hello";
        let mut src = MemorySource::new(data);
        assert_eq!(src.read().unwrap(), 5);
        assert_eq!(src.block(), b"hello");
        assert_eq!(src.read().unwrap(), 0);
        assert_eq!(src.skip(3).unwrap(), 0);
    }

    #[test]
    fn seekable_skip_is_clamped() {
        let mut src = SeekableSource::new(io::Cursor::new(vec![7u8; 100]), 16);
        src.open().unwrap();
        assert_eq!(src.read().unwrap(), 16);
        assert_eq!(src.skip(50).unwrap(), 50);
        assert_eq!(src.read().unwrap(), 16);
        assert_eq!(src.skip(1000).unwrap(), 18);
        assert_eq!(src.read().unwrap(), 0);
    }

    #[test]
    fn reader_blocks() {
        let mut src = ReaderSource::new(&b"abcdefg"[..], 3);
        let mut got = Vec::new();
        while src.read().unwrap() != 0 {
            got.push(src.block().to_vec());
        }
        assert_eq!(got, [&b"abc"[..], b"def", b"g"]);
    }
}
