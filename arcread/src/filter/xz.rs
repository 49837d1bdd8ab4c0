//! xz and the legacy lzma-alone container, both decoded by liblzma.
use super::{Filter, FilterBidder, signature_bits};
#[cfg(feature = "xz")]
use super::{Codec, CodecFilter, FilterCode, Progress};
use crate::{Error, Result, archive::Config, stream::Upstream};

const XZ_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];

#[derive(Debug)]
pub struct XzBidder;

impl FilterBidder for XzBidder {
    fn name(&self) -> &'static str {
        "xz"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        signature_bits(buf, &XZ_MAGIC)
    }

    #[cfg(feature = "xz")]
    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        let codec = LzmaCodec::new_xz()?;
        Ok(Box::new(CodecFilter::new("xz", FilterCode::XZ, upstream, codec)))
    }

    #[cfg(not(feature = "xz"))]
    fn init<'a>(&self, _upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Err(Error::feature_disabled("xz", "xz"))
    }
}

/// lzma-alone has no magic number. The bid checks that the properties byte,
/// dictionary size and uncompressed size all hold common values.
#[derive(Debug)]
pub struct LzmaBidder;

impl FilterBidder for LzmaBidder {
    fn name(&self) -> &'static str {
        "lzma"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        let Some(header) = buf.get(..14) else {
            return 0;
        };
        let mut bits = 0;

        // (pb * 5 + lp) * 9 + lc, each within its range.
        let props = header[0];
        if props > (4 * 5 + 4) * 9 + 8 {
            return 0;
        }
        // The default lc=3, lp=0, pb=2.
        if props == 0x5D {
            bits += 8;
        }

        let dict_size = u32::from_le_bytes(header[1..5].try_into().expect("4 bytes"));
        let pow2 = dict_size.is_power_of_two() && (1 << 12..=1 << 27).contains(&dict_size);
        let pow2_plus_half = dict_size.count_ones() == 2
            && (dict_size >> dict_size.trailing_zeros()) == 0b11
            && (3 << 19..=3 << 26).contains(&dict_size);
        if !pow2 && !pow2_plus_half {
            return 0;
        }
        bits += 32;

        let raw_size = u64::from_le_bytes(header[5..13].try_into().expect("8 bytes"));
        if raw_size == u64::MAX {
            bits += 64;
        } else if raw_size < 1 << 40 {
            bits += 24;
        } else {
            return 0;
        }

        // The range coder always starts with a zero byte.
        if header[13] != 0 {
            return 0;
        }
        bits + 8
    }

    #[cfg(feature = "xz")]
    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        let codec = LzmaCodec::new_lzma_alone()?;
        Ok(Box::new(CodecFilter::new(
            "lzma",
            FilterCode::LZMA,
            upstream,
            codec,
        )))
    }

    #[cfg(not(feature = "xz"))]
    fn init<'a>(&self, _upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Err(Error::feature_disabled("lzma", "xz"))
    }
}

/// A liblzma decoder, also used by zip entries of method 95.
#[cfg(feature = "xz")]
pub(crate) struct LzmaCodec {
    name: &'static str,
    stream: liblzma::stream::Stream,
}

#[cfg(feature = "xz")]
impl LzmaCodec {
    pub(crate) fn new_xz() -> Result<Self> {
        let stream =
            liblzma::stream::Stream::new_stream_decoder(u64::MAX, liblzma::stream::CONCATENATED)
                .map_err(|err| Error::decompress("xz", err))?;
        Ok(Self { name: "xz", stream })
    }

    pub(crate) fn new_lzma_alone() -> Result<Self> {
        let stream = liblzma::stream::Stream::new_lzma_decoder(u64::MAX)
            .map_err(|err| Error::decompress("lzma", err))?;
        Ok(Self {
            name: "lzma",
            stream,
        })
    }
}

#[cfg(feature = "xz")]
impl Codec for LzmaCodec {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        use liblzma::stream::{Action, Status};

        // Concatenated xz streams only know they are done once told the input ended.
        let action = if input.is_empty() {
            Action::Finish
        } else {
            Action::Run
        };
        let (in0, out0) = (self.stream.total_in(), self.stream.total_out());
        let status = self
            .stream
            .process(input, output, action)
            .map_err(|err| Error::decompress(self.name, err))?;
        Ok(Progress {
            consumed: (self.stream.total_in() - in0) as usize,
            produced: (self.stream.total_out() - out0) as usize,
            stream_end: status == Status::StreamEnd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lzma_alone_bid() {
        let mut header = vec![0x5D, 0x00, 0x00, 0x80, 0x00];
        header.extend_from_slice(&u64::MAX.to_le_bytes());
        header.push(0);
        assert_eq!(LzmaBidder.bid(&header), 8 + 32 + 64 + 8);

        // 12 MiB is 3 << 22.
        header[1..5].copy_from_slice(&(3u32 << 22).to_le_bytes());
        assert_eq!(LzmaBidder.bid(&header), 8 + 32 + 64 + 8);

        header[1..5].copy_from_slice(&12345u32.to_le_bytes());
        assert_eq!(LzmaBidder.bid(&header), 0);
        assert_eq!(LzmaBidder.bid(b"ustar"), 0);
    }

    #[test]
    fn xz_bid() {
        assert_eq!(XzBidder.bid(&XZ_MAGIC), 48);
        assert_eq!(XzBidder.bid(b"\xFD7z"), 24);
        assert_eq!(XzBidder.bid(b"\xFD8z"), 0);
    }
}
