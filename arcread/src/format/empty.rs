//! An input that decodes to nothing at all is an archive without entries.
use super::{Block, Format, FormatCode, Reader};
use crate::{Entry, Result, Status};

#[derive(Debug, Default, Clone, Copy)]
pub struct Empty;

impl Format for Empty {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        Ok(if r.read_ahead(1)?.is_empty() { 1 } else { 0 })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, _entry: &mut Entry) -> Result<Status> {
        r.set_format(FormatCode::EMPTY, "Empty file");
        Ok(Status::Eof)
    }

    fn read_data<'s>(&'s mut self, _r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        Ok(None)
    }

    fn read_data_skip(&mut self, _r: &mut Reader<'_>) -> Result<()> {
        Ok(())
    }
}
