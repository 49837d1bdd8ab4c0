//! Rock Ridge entries in the System Use area of directory records.
use bstr::BString;

use super::{le32, long_time, short_time};
use crate::entry::{Device, Timestamp};

const NM_CURRENT: u8 = 1 << 1;
const NM_PARENT: u8 = 1 << 2;

const SL_CONTINUE: u8 = 1 << 0;
const SL_CURRENT: u8 = 1 << 1;
const SL_PARENT: u8 = 1 << 2;
const SL_ROOT: u8 = 1 << 3;

const TF_LONG_FORM: u8 = 1 << 7;

/// Where an entry's System Use area continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Continuation {
    pub block: u64,
    pub offset: u64,
    pub len: u64,
}

/// Attributes collected from the entries of one directory record.
#[derive(Debug, Default)]
pub(super) struct RockRidge {
    pub name: Option<BString>,
    pub mode: Option<u32>,
    pub nlink: Option<u32>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub ino: Option<u64>,
    pub rdev: Option<Device>,
    pub symlink: Option<BString>,
    /// The next symlink component needs a separator first.
    symlink_sep: bool,
    pub birthtime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
    pub atime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
    pub continuation: Option<Continuation>,
    /// The record is a relocated directory, hidden from its apparent place.
    pub relocated: bool,
    /// The record stands for the directory at this block.
    pub child_link: Option<u64>,
}

/// The number of bytes to skip in every System Use area, if `su` starts
/// with an SP entry announcing Rock Ridge.
pub(super) fn sharing_protocol(su: &[u8]) -> Option<usize> {
    match su {
        [b'S', b'P', 7, _, 0xBE, 0xEF, skip, ..] => Some(usize::from(*skip)),
        _ => None,
    }
}

pub(super) fn parse(mut su: &[u8], rr: &mut RockRidge) -> Result<(), &'static str> {
    const MALFORMED: &str = "malformed Rock Ridge entry";

    while su.len() >= 4 {
        let len = usize::from(su[2]);
        if len < 4 || len > su.len() {
            return Err(MALFORMED);
        }
        let (sig, data) = (&su[..2], &su[4..len]);
        su = &su[len..];

        match sig {
            b"NM" => {
                let (&flags, content) = data.split_first().ok_or(MALFORMED)?;
                let name = rr.name.get_or_insert_with(BString::default);
                if flags & NM_CURRENT != 0 {
                    name.push(b'.');
                } else if flags & NM_PARENT != 0 {
                    name.extend_from_slice(b"..");
                } else {
                    name.extend_from_slice(content);
                }
            }
            b"PX" => {
                if data.len() < 32 {
                    return Err(MALFORMED);
                }
                rr.mode = Some(le32(&data[0..]) as u32);
                rr.nlink = Some(le32(&data[8..]) as u32);
                rr.uid = Some(le32(&data[16..]));
                rr.gid = Some(le32(&data[24..]));
                if data.len() >= 40 {
                    rr.ino = Some(le32(&data[32..]));
                }
            }
            b"PN" => {
                if data.len() < 16 {
                    return Err(MALFORMED);
                }
                let raw = (le32(&data[0..]) << 32) | le32(&data[8..]);
                rr.rdev = Some(Device::from_raw(raw));
            }
            b"SL" => {
                let (_flags, mut comps) = data.split_first().ok_or(MALFORMED)?;
                let target = rr.symlink.get_or_insert_with(BString::default);
                while comps.len() >= 2 {
                    let (flags, len) = (comps[0], usize::from(comps[1]));
                    let content = comps.get(2..2 + len).ok_or(MALFORMED)?;
                    comps = &comps[2 + len..];
                    if flags & SL_ROOT != 0 {
                        target.clear();
                        target.push(b'/');
                        rr.symlink_sep = false;
                        continue;
                    }
                    if rr.symlink_sep {
                        target.push(b'/');
                    }
                    if flags & SL_CURRENT != 0 {
                        target.push(b'.');
                    } else if flags & SL_PARENT != 0 {
                        target.extend_from_slice(b"..");
                    } else {
                        target.extend_from_slice(content);
                    }
                    rr.symlink_sep = flags & SL_CONTINUE == 0;
                }
            }
            b"TF" => {
                let (&flags, mut stamps) = data.split_first().ok_or(MALFORMED)?;
                let (size, decode): (usize, fn(&[u8]) -> Option<Timestamp>) =
                    if flags & TF_LONG_FORM != 0 {
                        (17, long_time)
                    } else {
                        (7, short_time)
                    };
                // Creation, modification, access, attribute change, then
                // backup, expiration and effective times which have no home.
                let slots = [
                    &mut rr.birthtime,
                    &mut rr.mtime,
                    &mut rr.atime,
                    &mut rr.ctime,
                ];
                for (bit, slot) in slots.into_iter().enumerate() {
                    if flags & (1 << bit) == 0 {
                        continue;
                    }
                    let stamp = stamps.get(..size).ok_or(MALFORMED)?;
                    *slot = decode(stamp);
                    stamps = &stamps[size..];
                }
            }
            b"CE" => {
                if data.len() < 24 {
                    return Err(MALFORMED);
                }
                let ce = Continuation {
                    block: le32(&data[0..]),
                    offset: le32(&data[8..]),
                    len: le32(&data[16..]),
                };
                rr.continuation = (ce.len != 0).then_some(ce);
            }
            b"RE" => rr.relocated = true,
            b"CL" => {
                if data.len() < 8 {
                    return Err(MALFORMED);
                }
                rr.child_link = Some(le32(data));
            }
            b"ST" => break,
            // SP, RR, PL, ER, ES, ZF and unknown entries carry nothing used here.
            _ => {}
        }
    }
    Ok(())
}
