//! The whole decoded stream as a single entry named `data`.
use super::{Block, Format, FormatCode, Reader};
use crate::{Entry, Result, Status, entry::FileType};

#[derive(Debug, Default)]
pub struct Raw {
    emitted: bool,
    offset: u64,
}

impl Format for Raw {
    fn name(&self) -> &'static str {
        "raw"
    }

    /// Anything is raw data, so only bid when nothing else does.
    fn bid(&mut self, _r: &mut Reader<'_>, best_bid: u32) -> Result<u32> {
        Ok(if best_bid < 1 { 1 } else { 0 })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        if self.emitted {
            return Ok(Status::Eof);
        }
        self.emitted = true;
        r.set_format(FormatCode::RAW, "raw");
        entry.set_pathname("data");
        entry.set_mode(FileType::Regular.to_mode_bits() | 0o644);
        // The size is only known once everything was read.
        entry.set_size(None);
        Ok(Status::Ok)
    }

    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        let data = r.take(usize::MAX)?;
        if data.is_empty() {
            return Ok(None);
        }
        let offset = self.offset;
        self.offset += data.len() as u64;
        Ok(Some(Block { data, offset }))
    }

    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        loop {
            let n = r.take(usize::MAX)?.len();
            if n == 0 {
                return Ok(());
            }
            self.offset += n as u64;
        }
    }

    fn cleanup(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReadArchive;

    #[test]
    fn single_entry() {
        let data = b"just some bytes".repeat(1000);
        let mut ar = ReadArchive::new();
        ar.support_format_raw();
        ar.open_memory(&data).unwrap();

        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::RAW));
        let e = ar.entry();
        assert_eq!(e.pathname(), "data");
        assert!(e.is_file());
        assert_eq!(e.perm(), 0o644);
        assert_eq!(e.size(), None);
        let mut out = Vec::new();
        assert_eq!(ar.read_data_into(&mut out).unwrap(), data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    }

    #[test]
    fn lowest_bid() {
        let mut r = Reader::for_test(b"anything");
        assert_eq!(Raw::default().bid(&mut r, 0).unwrap(), 1);
        assert_eq!(Raw::default().bid(&mut r, 10).unwrap(), 0);
    }
}
