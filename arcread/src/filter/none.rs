//! The pass-through filter for uncompressed input.
use super::{Filter, FilterBidder, FilterCode};
use crate::{Result, archive::Config, stream::Upstream};

#[derive(Debug)]
pub struct NoneBidder;

impl FilterBidder for NoneBidder {
    fn name(&self) -> &'static str {
        "none"
    }

    fn bid(&mut self, _buf: &[u8]) -> u32 {
        1
    }

    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Ok(Box::new(NoneFilter(upstream)))
    }
}

#[derive(Debug)]
struct NoneFilter<'a>(Upstream<'a>);

impl Filter for NoneFilter<'_> {
    fn name(&self) -> &'static str {
        "none"
    }

    fn code(&self) -> FilterCode {
        FilterCode::NONE
    }

    fn fill(&mut self) -> Result<&[u8]> {
        Ok(self.0.fill()?)
    }

    fn consume(&mut self, amt: usize) {
        self.0.consume(amt);
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        Ok(self.0.skip(n)?)
    }

    fn raw_position(&self) -> u64 {
        self.0.position()
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.0.close()?)
    }
}
