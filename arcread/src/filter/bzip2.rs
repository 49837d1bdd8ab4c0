//! bzip2, possibly with several concatenated streams.
use super::{Filter, FilterBidder, signature_bits};
#[cfg(feature = "bzip2")]
use super::{Codec, CodecFilter, FilterCode, Progress};
use crate::{Error, Result, archive::Config, stream::Upstream};

const BLOCK_MAGIC: [u8; 6] = [0x31, 0x41, 0x59, 0x26, 0x53, 0x59];
const END_MAGIC: [u8; 6] = [0x17, 0x72, 0x45, 0x38, 0x50, 0x90];

#[derive(Debug)]
pub struct Bzip2Bidder;

impl FilterBidder for Bzip2Bidder {
    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        let mut bits = signature_bits(buf, b"BZh");
        if bits < 24 {
            return bits;
        }
        // Block size digit, 9 valid values out of 256.
        match buf.get(3) {
            Some(b'1'..=b'9') => bits += 5,
            Some(_) => return 0,
            None => return bits,
        }
        // Either a compressed block or the end-of-stream marker of an empty stream.
        if let Some(magic) = buf.get(4..10) {
            if magic != BLOCK_MAGIC && magic != END_MAGIC {
                return 0;
            }
            bits += 48;
        }
        bits
    }

    #[cfg(feature = "bzip2")]
    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        let codec = Bzip2Codec::new();
        Ok(Box::new(CodecFilter::new(
            "bzip2",
            FilterCode::BZIP2,
            upstream,
            codec,
        )))
    }

    #[cfg(not(feature = "bzip2"))]
    fn init<'a>(&self, _upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Err(Error::feature_disabled("bzip2", "bzip2"))
    }
}

/// A single bzip2 stream, also used by zip entries of method 12.
#[cfg(feature = "bzip2")]
pub(crate) struct Bzip2Codec(bzip2::Decompress);

#[cfg(feature = "bzip2")]
impl Bzip2Codec {
    pub(crate) fn new() -> Self {
        Self(bzip2::Decompress::new(false))
    }
}

#[cfg(feature = "bzip2")]
impl Codec for Bzip2Codec {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let (in0, out0) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .decompress(input, output)
            .map_err(|err| Error::decompress("bzip2", err))?;
        Ok(Progress {
            consumed: (self.0.total_in() - in0) as usize,
            produced: (self.0.total_out() - out0) as usize,
            stream_end: status == bzip2::Status::StreamEnd,
        })
    }

    fn next_member(&mut self, up: &mut Upstream<'_>) -> Result<bool> {
        // The next stream must start inside the current block for us to see
        // its signature without consuming it.
        let next = up.fill()?;
        if next.is_empty() {
            return Ok(false);
        }
        if !next.starts_with(b"BZh") {
            debug!("bzip2: ignoring trailing garbage at raw offset {}", up.position());
            return Ok(false);
        }
        self.0 = bzip2::Decompress::new(false);
        trace!("bzip2: next stream at raw offset {}", up.position());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_levels() {
        let mut b = Bzip2Bidder;
        assert_eq!(b.bid(b"BZ"), 16);
        assert_eq!(b.bid(b"BZh9"), 29);
        assert_eq!(b.bid(b"BZh0"), 0);
        assert_eq!(b.bid(b"BZh91AY&SY"), 77);
        assert_eq!(b.bid(b"BZh9garbag"), 0);
    }
}
