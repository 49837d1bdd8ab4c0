//! GNU sparse maps: the old in-header form and the pax 0.x/1.0 forms.
use crate::{Error, Result, format::Reader};

use super::{BLOCK, parse_number};

/// Size of one old-style map entry: 12 bytes offset, 12 bytes length.
pub(super) const OLD_ENTRY: usize = 24;
/// Entries in a sparse extension block, followed by the "is extended" flag.
const EXT_ENTRIES: usize = 21;

/// Append the non-empty entries of an old-style map.
pub(super) fn push_old_entries(runs: &mut Vec<(u64, u64)>, entries: &[u8]) {
    for ent in entries.chunks_exact(OLD_ENTRY) {
        let offset = parse_number(&ent[..12]);
        let len = parse_number(&ent[12..]);
        if offset == 0 && len == 0 {
            // Unused slot.
            continue;
        }
        runs.push((offset.max(0) as u64, len.max(0) as u64));
    }
}

/// Read the extension blocks following an old GNU sparse header.
pub(super) fn read_old_extensions(
    r: &mut Reader<'_>,
    runs: &mut Vec<(u64, u64)>,
    limit: u32,
) -> Result<()> {
    for _ in 0..limit {
        let block = r.require(BLOCK, "GNU sparse extension block")?;
        push_old_entries(runs, &block[..EXT_ENTRIES * OLD_ENTRY]);
        let more = block[EXT_ENTRIES * OLD_ENTRY] != 0;
        r.consume(BLOCK);
        if !more {
            return Ok(());
        }
    }
    bail!(Error::fatal("too many GNU sparse extension blocks"));
}

/// Parse a 1.0 map: a run count followed by offset and length pairs, each
/// number on its own line. Returns `None` if `buf` ends before the map does,
/// otherwise the runs and the map size rounded up to whole blocks.
fn parse_map_1_0(buf: &[u8]) -> Result<Option<(Vec<(u64, u64)>, usize)>, &'static str> {
    let mut pos = 0;
    let mut next = || -> Result<Option<u64>, &'static str> {
        let rest = &buf[pos..];
        let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let n = super::pax::parse_decimal(&rest[..nl]).ok_or("malformed sparse map number")?;
        pos += nl + 1;
        Ok(Some(n))
    };

    let Some(count) = next()? else { return Ok(None) };
    let mut runs = Vec::new();
    for _ in 0..count {
        let (Some(offset), Some(len)) = (next()?, next()?) else {
            return Ok(None);
        };
        runs.push((offset, len));
    }
    let size = pos.div_ceil(BLOCK) * BLOCK;
    Ok(Some((runs, size)))
}

/// Read and consume a 1.0 map at the start of the entry body. Returns the
/// runs and the number of body bytes the map took.
pub(super) fn read_map_1_0(
    r: &mut Reader<'_>,
    body_size: u64,
    limit: u64,
) -> Result<(Vec<(u64, u64)>, u64)> {
    let mut want = BLOCK;
    loop {
        if want as u64 > body_size.min(limit) {
            bail!(Error::fatal("GNU sparse map is too large or truncated"));
        }
        let buf = r.require(want, "GNU sparse map")?;
        match parse_map_1_0(buf) {
            Ok(Some((runs, size))) => {
                r.consume(size);
                return Ok((runs, size as u64));
            }
            Ok(None) => want += BLOCK,
            Err(msg) => bail!(Error::fatal(msg)),
        }
    }
}

/// Check that runs are ordered, lie within `realsize` and add up to the
/// stored size.
pub(super) fn validate(runs: &[(u64, u64)], stored: u64, realsize: u64) -> Result<()> {
    let mut end = 0u64;
    let mut total = 0u64;
    for &(offset, len) in runs {
        if offset < end {
            bail!(Error::fatal("GNU sparse map offsets are not increasing"));
        }
        end = offset
            .checked_add(len)
            .filter(|&end| end <= realsize)
            .ok_or_else(|| Error::fatal("GNU sparse map exceeds the file size"))?;
        total += len;
    }
    if total != stored {
        bail!(Error::fatal(format!(
            "GNU sparse map covers {total} bytes but {stored} are stored",
        )));
    }
    Ok(())
}
