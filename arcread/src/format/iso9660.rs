//! ISO 9660 images, optionally with Rock Ridge extensions.
//!
//! The image is read strictly forward. Directory records discovered while
//! walking the tree are queued by the end offset of their extent and always
//! served earliest first, so that files are visited in disk order regardless
//! of the order the directories list them in. Anything found behind the
//! current position can no longer be read and is reported with a warning.
use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
};

use bstr::BString;

use super::{Block, Body, Format, FormatCode, OptionExt, Reader, days_from_civil};
use crate::{
    Entry, Error, Result, Status,
    entry::{FileType, Timestamp},
};

mod rockridge;

use rockridge::{Continuation, RockRidge};

const SECTOR: usize = 2048;
/// The system area preceding the volume descriptors.
const SYSTEM_AREA: u64 = 16 * SECTOR as u64;
/// Volume descriptors looked at before giving up on finding the terminator.
const MAX_DESCRIPTORS: usize = 16;

const TYPE_PRIMARY: u8 = 1;
const TYPE_TERMINATOR: u8 = 255;
const STANDARD_ID: &[u8] = b"CD001";

const FLAG_DIRECTORY: u8 = 1 << 1;
const FLAG_MULTI_EXTENT: u8 = 1 << 7;

/// Fixed part of a directory record plus a one byte name.
const RECORD_MIN: usize = 34;

fn le16(b: &[u8]) -> u64 {
    u16::from_le_bytes([b[0], b[1]]).into()
}

fn le32(b: &[u8]) -> u64 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]]).into()
}

/// A 7-byte directory record date.
fn short_time(b: &[u8]) -> Option<Timestamp> {
    if b.len() < 7 || b[..7].iter().all(|&x| x == 0) {
        return None;
    }
    let days = days_from_civil(
        1900 + i64::from(b[0]),
        u32::from(b[1]).clamp(1, 12),
        u32::from(b[2]).max(1),
    );
    let secs = i64::from(b[3]) * 3600 + i64::from(b[4]) * 60 + i64::from(b[5]);
    // Offset from GMT in 15 minute intervals.
    let tz = i64::from(b[6] as i8) * 900;
    Some(Timestamp::new(days * 86400 + secs - tz, 0))
}

/// A 17-byte volume descriptor style date, `YYYYMMDDHHMMSScc` and a zone.
fn long_time(b: &[u8]) -> Option<Timestamp> {
    if b.len() < 17 {
        return None;
    }
    let num = |lo: usize, hi: usize| {
        b[lo..hi].iter().try_fold(0i64, |acc, &c| {
            c.is_ascii_digit().then(|| acc * 10 + i64::from(c - b'0'))
        })
    };
    let year = num(0, 4)?;
    if year == 0 {
        return None;
    }
    let days = days_from_civil(
        year,
        (num(4, 6)? as u32).clamp(1, 12),
        (num(6, 8)? as u32).max(1),
    );
    let secs = num(8, 10)? * 3600 + num(10, 12)? * 60 + num(12, 14)?;
    let centis = num(14, 16)?;
    let tz = i64::from(b[16] as i8) * 900;
    Some(Timestamp::new(
        days * 86400 + secs - tz,
        (centis * 10_000_000) as u32,
    ))
}

/// A directory record, borrowed from the directory extent.
#[derive(Debug)]
struct Record<'a> {
    /// Block number of the extent.
    location: u64,
    size: u64,
    date: &'a [u8],
    flags: u8,
    name: &'a [u8],
    system_use: &'a [u8],
}

impl<'a> Record<'a> {
    fn parse(b: &'a [u8]) -> Option<Self> {
        let len = usize::from(*b.first()?);
        if len < RECORD_MIN || len > b.len() {
            return None;
        }
        let b = &b[..len];
        let name_len = usize::from(b[32]);
        // The name is padded to an even offset.
        let su_start = 33 + name_len + (1 - name_len % 2);
        Some(Self {
            location: le32(&b[2..6]),
            size: le32(&b[10..14]),
            date: &b[18..25],
            flags: b[25],
            name: b.get(33..33 + name_len)?,
            system_use: b.get(su_start..).unwrap_or_default(),
        })
    }

    fn is_self_or_parent(&self) -> bool {
        matches!(self.name, [0] | [1])
    }
}

/// Strip the `;1` version suffix and the dot of extension-less names.
fn iso_name(name: &[u8]) -> &[u8] {
    let name = match name.iter().rposition(|&b| b == b';') {
        Some(i) => &name[..i],
        None => name,
    };
    name.strip_suffix(b".").unwrap_or(name)
}

#[derive(Debug, Clone, Copy)]
struct Volume {
    block_size: u64,
    /// Volume size in bytes.
    size: u64,
}

/// Validate a primary volume descriptor, returning the volume and the root
/// directory record.
fn primary_volume(d: &[u8]) -> Option<(Volume, &[u8])> {
    if d.len() < SECTOR || d[0] != TYPE_PRIMARY || &d[1..6] != STANDARD_ID || d[6] != 1 {
        return None;
    }
    let blocks = le32(&d[80..84]);
    let block_size = le16(&d[128..130]);
    if blocks == 0 || !block_size.is_power_of_two() || block_size > SECTOR as u64 {
        return None;
    }
    let root = &d[156..190];
    if usize::from(root[0]) != RECORD_MIN {
        return None;
    }
    let volume = Volume {
        block_size,
        size: blocks * block_size,
    };
    Some((volume, root))
}

/// A directory in the arena. Files refer to their parent by index.
#[derive(Debug)]
struct DirNode {
    parent: Option<usize>,
    name: BString,
}

#[derive(Debug)]
struct File {
    /// Arena index of the parent, `None` for the root.
    parent: Option<usize>,
    name: BString,
    /// Byte offset of the extent.
    offset: u64,
    size: u64,
    is_dir: bool,
    /// Reached through a Rock Ridge child link, the size comes from the
    /// directory's own `.` record.
    child_link: bool,
    depth: u32,
    mtime: Option<Timestamp>,
    rr: RockRidge,
    warning: Option<String>,
}

#[derive(Debug)]
enum Pending {
    Ready,
    /// A Rock Ridge continuation area has to be read first.
    Continuation(Continuation),
}

#[derive(Debug)]
struct Queued {
    key: u64,
    /// Insertion order, to keep the sort stable.
    seq: u64,
    pending: Pending,
    file: Box<File>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.key, self.seq).cmp(&(other.key, other.seq))
    }
}

#[derive(Debug, Default)]
pub struct Iso9660 {
    volume: Option<Volume>,
    rock_ridge: bool,
    /// Bytes to skip at the start of each System Use area.
    su_skip: usize,
    dirs: Vec<DirNode>,
    queue: BinaryHeap<Reverse<Queued>>,
    seq: u64,
    /// First path emitted for each file extent.
    extents: HashMap<u64, BString>,
    dir_bytes: u64,
    body: Body,
}

impl Iso9660 {
    fn volume(&self) -> Volume {
        self.volume.expect("volume is read before any file")
    }

    fn check_extent(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.volume().size => Ok(()),
            _ => bail!(Error::fatal(format!(
                "ISO 9660 extent at {offset} of {size} bytes lies beyond the end of the volume",
            ))),
        }
    }

    fn enqueue(&mut self, mut file: Box<File>) {
        let (key, pending) = match file.rr.continuation.take() {
            Some(ce) => {
                let start = ce.block * self.volume().block_size + ce.offset;
                (start + ce.len, Pending::Continuation(ce))
            }
            None => {
                if let Some(name) = file.rr.name.take() {
                    file.name = name;
                }
                (file.offset + file.size, Pending::Ready)
            }
        };
        self.seq += 1;
        self.queue.push(Reverse(Queued {
            key,
            seq: self.seq,
            pending,
            file,
        }));
    }

    fn path_of(&self, parent: Option<usize>, name: &[u8]) -> BString {
        let mut parts = vec![name];
        let mut cur = parent;
        while let Some(i) = cur {
            let dir = &self.dirs[i];
            if dir.parent.is_some() {
                parts.push(dir.name.as_slice());
            }
            cur = dir.parent;
        }
        parts.reverse();
        parts.join(&b'/').into()
    }

    fn read_volume(&mut self, r: &mut Reader<'_>) -> Result<()> {
        r.skip(SYSTEM_AREA.saturating_sub(r.position()))?;
        let mut root = None;
        for _ in 0..MAX_DESCRIPTORS {
            let d = r.require(SECTOR, "ISO 9660 volume descriptor")?;
            if &d[1..6] != STANDARD_ID {
                bail!(Error::fatal("invalid ISO 9660 volume descriptor"));
            }
            let ty = d[0];
            if root.is_none() {
                if let Some((volume, rec)) = primary_volume(d) {
                    let rec = Record::parse(rec).context("invalid root directory record")?;
                    self.volume = Some(volume);
                    root = Some((rec.location * volume.block_size, rec.size, short_time(rec.date)));
                }
            }
            r.consume(SECTOR);
            if ty == TYPE_TERMINATOR {
                break;
            }
        }
        let (offset, size, mtime) = root.context("no ISO 9660 primary volume descriptor")?;
        debug!(
            "ISO 9660 volume of {} bytes, root directory at {offset}",
            self.volume().size,
        );
        self.check_extent(offset, size)?;
        self.dirs.clear();
        self.enqueue(Box::new(File {
            parent: None,
            name: BString::default(),
            offset,
            size,
            is_dir: true,
            child_link: false,
            depth: 0,
            mtime,
            rr: RockRidge::default(),
            warning: None,
        }));
        Ok(())
    }

    fn read_continuation(
        &mut self,
        r: &mut Reader<'_>,
        file: &mut File,
        ce: Continuation,
    ) -> Result<()> {
        let start = ce.block * self.volume().block_size + ce.offset;
        let pos = r.position();
        if start < pos || ce.len > self.volume().block_size {
            file.warning = Some(format!(
                "ignoring Rock Ridge continuation area at {start} for {:?}",
                file.name,
            ));
            return Ok(());
        }
        self.check_extent(start, ce.len)?;
        r.skip(start - pos)?;
        let len = ce.len as usize;
        let data = r.require(len, "Rock Ridge continuation area")?;
        if let Err(msg) = rockridge::parse(data, &mut file.rr) {
            file.warning = Some(msg.into());
        }
        r.consume(len);
        Ok(())
    }

    /// Read a directory extent and queue its children.
    fn read_directory(&mut self, r: &mut Reader<'_>, dir: &mut File) -> Result<()> {
        let pos = r.position();
        if dir.offset < pos {
            dir.warning = Some(format!(
                "ignoring out-of-order directory at {} < {pos}",
                dir.offset,
            ));
            return Ok(());
        }
        r.skip(dir.offset - pos)?;
        if dir.child_link {
            let buf = r.require(RECORD_MIN, "ISO 9660 directory")?;
            let rec = Record::parse(buf).context("invalid relocated directory record")?;
            dir.size = rec.size;
            self.check_extent(dir.offset, dir.size)?;
        }

        self.dir_bytes += dir.size;
        if self.dir_bytes > r.config().iso_directory_limit {
            bail!(Error::fatal("ISO 9660 directories exceed the size limit"));
        }
        let depth_limit = r.config().iso_depth_limit;
        let ce_limit = r.config().header_recursion_limit;
        let block_size = self.volume().block_size as usize;

        let index = self.dirs.len();
        self.dirs.push(DirNode {
            parent: dir.parent,
            name: dir.name.clone(),
        });

        let size = usize::try_from(dir.size)
            .ok()
            .context("ISO 9660 directory is too large")?;
        let buf = r.require(size, "ISO 9660 directory")?;
        let mut pos = 0;
        while pos < buf.len() {
            if buf[pos] == 0 {
                // Records never cross a block boundary.
                pos = (pos / block_size + 1) * block_size;
                continue;
            }
            let rec = Record::parse(&buf[pos..]).context("invalid ISO 9660 directory record")?;
            pos += usize::from(buf[pos]);

            if rec.is_self_or_parent() {
                if rec.name == b"\0" && dir.parent.is_none() {
                    if let Some(skip) = rockridge::sharing_protocol(rec.system_use) {
                        self.rock_ridge = true;
                        self.su_skip = skip;
                    }
                }
                continue;
            }

            let mut child = Box::new(File {
                parent: Some(index),
                name: iso_name(rec.name).into(),
                offset: rec.location * block_size as u64,
                size: rec.size,
                is_dir: rec.flags & FLAG_DIRECTORY != 0,
                child_link: false,
                depth: dir.depth + 1,
                mtime: short_time(rec.date),
                rr: RockRidge::default(),
                warning: None,
            });
            if rec.flags & FLAG_MULTI_EXTENT != 0 {
                child.warning = Some("multi-extent files are read one extent at a time".into());
            }

            if self.rock_ridge {
                let su = rec.system_use.get(self.su_skip..).unwrap_or_default();
                if let Err(msg) = rockridge::parse(su, &mut child.rr) {
                    child.warning = Some(msg.into());
                }
                // Continuation areas inside this extent are resolved right away.
                for _ in 0..ce_limit {
                    let Some(ce) = child.rr.continuation else {
                        break;
                    };
                    let start = ce.block * block_size as u64 + ce.offset;
                    let Some(rel) = start.checked_sub(dir.offset) else {
                        break;
                    };
                    let Some(area) = usize::try_from(rel)
                        .ok()
                        .and_then(|rel| buf.get(rel..rel.checked_add(ce.len as usize)?))
                    else {
                        break;
                    };
                    child.rr.continuation = None;
                    if let Err(msg) = rockridge::parse(area, &mut child.rr) {
                        child.warning = Some(msg.into());
                    }
                }
                if child.rr.relocated {
                    // Listed again where a child link points at it.
                    continue;
                }
                if let Some(block) = child.rr.child_link {
                    child.is_dir = true;
                    child.child_link = true;
                    child.offset = block * block_size as u64;
                    child.size = 0;
                }
            }

            if child.is_dir && child.depth > depth_limit {
                bail!(Error::fatal("ISO 9660 directory hierarchy is too deep"));
            }
            self.check_extent(child.offset, child.size)?;
            self.enqueue(child);
        }
        r.consume(size);
        Ok(())
    }

    fn emit(&mut self, r: &mut Reader<'_>, file: Box<File>, entry: &mut Entry) -> Result<Status> {
        let File {
            parent,
            name,
            offset,
            size,
            is_dir,
            mtime,
            rr,
            mut warning,
            ..
        } = *file;
        let path = self.path_of(parent, &name);
        entry.set_pathname(&path);

        let default_mode = if is_dir {
            FileType::Directory.to_mode_bits() | 0o555
        } else {
            FileType::Regular.to_mode_bits() | 0o444
        };
        entry.set_mode(rr.mode.unwrap_or(default_mode));
        if is_dir {
            entry.set_file_type(Some(FileType::Directory));
        }
        entry.set_uid(rr.uid.unwrap_or(0));
        entry.set_gid(rr.gid.unwrap_or(0));
        entry.set_nlink(rr.nlink.unwrap_or(if is_dir { 2 } else { 1 }));
        entry.set_ino(Some(rr.ino.unwrap_or(offset)));
        entry.set_mtime(rr.mtime.or(mtime));
        entry.set_atime(rr.atime);
        entry.set_ctime(rr.ctime);
        entry.set_birthtime(rr.birthtime);
        if let Some(rdev) = rr.rdev {
            entry.set_rdev(rdev);
        }
        if let Some(target) = &rr.symlink {
            entry.set_symlink(target);
            entry.set_file_type(Some(FileType::Symlink));
        }

        if is_dir || rr.symlink.is_some() || !entry.is_file() {
            entry.set_size(Some(0));
        } else {
            entry.set_size(Some(size));
            if size != 0 {
                if let Some(first) = self.extents.get(&offset) {
                    entry.set_hardlink(first);
                    entry.set_size(Some(0));
                } else {
                    let pos = r.position();
                    if offset < pos {
                        warning = Some(format!("ignoring out-of-order file at {offset} < {pos}"));
                    } else {
                        r.skip(offset - pos)?;
                        self.body = Body::new(size, 0);
                        if self.extents.len() < r.config().hardlink_table_limit {
                            self.extents.insert(offset, path);
                        }
                    }
                }
            }
        }

        if self.rock_ridge {
            r.set_format(FormatCode::ISO9660_ROCKRIDGE, "ISO9660 with Rockridge extensions");
        } else {
            r.set_format(FormatCode::ISO9660, "ISO9660");
        }
        match warning {
            Some(msg) => Ok(r.warn(msg)),
            None => Ok(Status::Ok),
        }
    }
}

impl Format for Iso9660 {
    fn name(&self) -> &'static str {
        "iso9660"
    }

    fn bid(&mut self, r: &mut Reader<'_>, best_bid: u32) -> Result<u32> {
        if best_bid > 48 {
            return Ok(0);
        }
        let buf = r.read_ahead(SYSTEM_AREA as usize + SECTOR * MAX_DESCRIPTORS)?;
        let Some(descriptors) = buf.get(SYSTEM_AREA as usize..) else {
            return Ok(0);
        };
        for d in descriptors.chunks_exact(SECTOR) {
            if &d[1..6] != STANDARD_ID {
                return Ok(0);
            }
            match d[0] {
                TYPE_PRIMARY if primary_volume(d).is_some() => return Ok(48),
                TYPE_TERMINATOR => return Ok(0),
                _ => {}
            }
        }
        Ok(0)
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        self.body = Body::default();
        if self.volume.is_none() {
            self.read_volume(r)?;
        }
        loop {
            let Some(Reverse(q)) = self.queue.pop() else {
                return Ok(Status::Eof);
            };
            let mut file = q.file;
            if let Pending::Continuation(ce) = q.pending {
                self.read_continuation(r, &mut file, ce)?;
                self.enqueue(file);
                continue;
            }
            if file.is_dir {
                self.read_directory(r, &mut file)?;
                if file.parent.is_none() {
                    continue;
                }
            }
            return self.emit(r, file, entry);
        }
    }

    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        self.body.read(r)
    }

    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        self.body.skip(r)
    }

    fn cleanup(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests;
