//! Zstandard, possibly with several frames.
use super::{Filter, FilterBidder, signature_bits};
#[cfg(feature = "zstd")]
use super::{Codec, CodecFilter, FilterCode, Progress};
use crate::{Error, Result, archive::Config, stream::Upstream};

const MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Debug)]
pub struct ZstdBidder;

impl FilterBidder for ZstdBidder {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        signature_bits(buf, &MAGIC)
    }

    #[cfg(feature = "zstd")]
    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Ok(Box::new(CodecFilter::new(
            "zstd",
            FilterCode::ZSTD,
            upstream,
            ZstdCodec::new(),
        )))
    }

    #[cfg(not(feature = "zstd"))]
    fn init<'a>(&self, _upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Err(Error::feature_disabled("zstd", "zstd"))
    }
}

#[cfg(feature = "zstd")]
pub(crate) struct ZstdCodec(zstd_safe::DCtx<'static>);

#[cfg(feature = "zstd")]
impl ZstdCodec {
    pub(crate) fn new() -> Self {
        Self(zstd_safe::DCtx::create())
    }
}

#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let mut inbuf = zstd_safe::InBuffer::around(input);
        let mut outbuf = zstd_safe::OutBuffer::around(output);
        let hint = self
            .0
            .decompress_stream(&mut outbuf, &mut inbuf)
            .map_err(|code| Error::decompress_msg("zstd", zstd_safe::get_error_name(code)))?;
        Ok(Progress {
            consumed: inbuf.pos,
            produced: outbuf.pos(),
            // Zero means a frame is complete and fully flushed.
            stream_end: hint == 0,
        })
    }

    fn next_member(&mut self, up: &mut Upstream<'_>) -> Result<bool> {
        // The context starts the next frame on its own, skippable frames included.
        Ok(!up.fill()?.is_empty())
    }
}
