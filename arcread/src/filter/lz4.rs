//! LZ4 frame format, possibly with several frames.
use super::{Filter, FilterBidder, signature_bits};
use crate::{Error, Result, archive::Config, stream::Upstream};

const MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

#[derive(Debug)]
pub struct Lz4Bidder;

impl FilterBidder for Lz4Bidder {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        let bits = signature_bits(buf, &MAGIC);
        if bits < 32 {
            return bits;
        }
        // FLG: version 01, reserved bit 1 clear.
        match buf.get(4) {
            Some(flg) if flg & 0xC2 == 0x40 => bits + 8,
            Some(_) => 0,
            None => bits,
        }
    }

    #[cfg(feature = "lz4")]
    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        let decoder = lz4::Decoder::new(upstream).map_err(|err| Error::decompress("lz4", err))?;
        Ok(Box::new(imp::Lz4Filter::new(decoder)))
    }

    #[cfg(not(feature = "lz4"))]
    fn init<'a>(&self, _upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Err(Error::feature_disabled("lz4", "lz4"))
    }
}

#[cfg(feature = "lz4")]
mod imp {
    use std::io::Read;

    use super::MAGIC;
    use crate::{Error, Result, filter::Filter, filter::FilterCode, stream::Upstream};

    enum State<'a> {
        Frame(lz4::Decoder<Upstream<'a>>),
        Done(Upstream<'a>),
        /// Only observable if a frame transition failed.
        Broken,
    }

    pub(super) struct Lz4Filter<'a> {
        state: State<'a>,
        out: Box<[u8]>,
        pos: usize,
        end: usize,
    }

    impl<'a> Lz4Filter<'a> {
        pub(super) fn new(decoder: lz4::Decoder<Upstream<'a>>) -> Self {
            Self {
                state: State::Frame(decoder),
                out: vec![0u8; 64 << 10].into_boxed_slice(),
                pos: 0,
                end: 0,
            }
        }

        fn end_frame(&mut self) -> Result<()> {
            let State::Frame(decoder) = std::mem::replace(&mut self.state, State::Broken) else {
                unreachable!()
            };
            let (mut up, ret) = decoder.finish();
            if ret.is_err() {
                bail!(Error::truncated("lz4 frame"));
            }
            if up.fill()?.starts_with(&MAGIC) {
                trace!("lz4: next frame at raw offset {}", up.position());
                let decoder = lz4::Decoder::new(up).map_err(|err| Error::decompress("lz4", err))?;
                self.state = State::Frame(decoder);
            } else {
                if !up.fill()?.is_empty() {
                    debug!("lz4: ignoring trailing garbage at raw offset {}", up.position());
                }
                self.state = State::Done(up);
            }
            Ok(())
        }
    }

    impl Filter for Lz4Filter<'_> {
        fn name(&self) -> &'static str {
            "lz4"
        }

        fn code(&self) -> FilterCode {
            FilterCode::LZ4
        }

        fn fill(&mut self) -> Result<&[u8]> {
            while self.pos == self.end {
                let State::Frame(decoder) = &mut self.state else {
                    break;
                };
                self.pos = 0;
                self.end = decoder
                    .read(&mut self.out)
                    .map_err(|err| Error::decompress("lz4", err))?;
                if self.end == 0 {
                    self.end_frame()?;
                }
            }
            Ok(&self.out[self.pos..self.end])
        }

        fn consume(&mut self, amt: usize) {
            assert!(amt <= self.end - self.pos, "consume past decoded bytes");
            self.pos += amt;
        }

        fn raw_position(&self) -> u64 {
            match &self.state {
                State::Frame(decoder) => decoder.reader().position(),
                State::Done(up) => up.position(),
                State::Broken => 0,
            }
        }

        fn close(&mut self) -> Result<()> {
            match std::mem::replace(&mut self.state, State::Broken) {
                State::Frame(decoder) => decoder.finish().0.close()?,
                State::Done(mut up) => up.close()?,
                State::Broken => {}
            }
            Ok(())
        }
    }
}
