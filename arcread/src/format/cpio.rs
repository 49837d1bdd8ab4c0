//! cpio: portable ASCII (odc), SVR4 (newc) with and without checksum, and
//! the old binary format in either byte order.
//!
//! Every member is a header, the NUL-terminated name and the body. The
//! archive ends with a member named `TRAILER!!!`. Hard links are stored as
//! complete members sharing a device and inode, which are collapsed through a
//! [`LinkResolver`].
use bstr::ByteSlice;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use super::{Block, Body, Format, FormatCode, Reader, padding};
use crate::{
    Entry, Error, Result, Status,
    entry::{Device, FileType, Timestamp},
    link_resolver::LinkResolver,
};

const TRAILER: &[u8] = b"TRAILER!!!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Odc,
    Newc,
    Crc,
    BinLe,
    BinBe,
}

impl Variant {
    fn sniff(buf: &[u8]) -> Option<Self> {
        Some(match buf.get(..6)? {
            b"070707" => Self::Odc,
            b"070701" => Self::Newc,
            b"070702" => Self::Crc,
            [0xC7, 0x71, ..] => Self::BinLe,
            [0x71, 0xC7, ..] => Self::BinBe,
            _ => return None,
        })
    }

    fn header_size(self) -> usize {
        match self {
            Self::Odc => size_of::<OdcHeader>(),
            Self::Newc | Self::Crc => size_of::<NewcHeader>(),
            Self::BinLe | Self::BinBe => BIN_HEADER_SIZE,
        }
    }

    fn align(self) -> u64 {
        match self {
            Self::Odc => 1,
            Self::Newc | Self::Crc => 4,
            Self::BinLe | Self::BinBe => 2,
        }
    }

    fn format(self) -> (FormatCode, &'static str) {
        match self {
            Self::Odc => (FormatCode::CPIO_POSIX, "POSIX octet-oriented cpio"),
            Self::Newc => (FormatCode::CPIO_SVR4_NOCRC, "SVR4 cpio nocrc"),
            Self::Crc => (FormatCode::CPIO_SVR4_CRC, "SVR4 cpio crc"),
            Self::BinLe => (FormatCode::CPIO_BIN_LE, "cpio (little-endian binary)"),
            Self::BinBe => (FormatCode::CPIO_BIN_BE, "cpio (big-endian binary)"),
        }
    }
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct OdcHeader {
    magic: [u8; 6],
    dev: [u8; 6],
    ino: [u8; 6],
    mode: [u8; 6],
    uid: [u8; 6],
    gid: [u8; 6],
    nlink: [u8; 6],
    rdev: [u8; 6],
    mtime: [u8; 11],
    namesize: [u8; 6],
    filesize: [u8; 11],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct NewcHeader {
    magic: [u8; 6],
    ino: [u8; 8],
    mode: [u8; 8],
    uid: [u8; 8],
    gid: [u8; 8],
    nlink: [u8; 8],
    mtime: [u8; 8],
    filesize: [u8; 8],
    devmajor: [u8; 8],
    devminor: [u8; 8],
    rdevmajor: [u8; 8],
    rdevminor: [u8; 8],
    namesize: [u8; 8],
    check: [u8; 8],
}

const _: () = assert!(size_of::<OdcHeader>() == 76);
const _: () = assert!(size_of::<NewcHeader>() == 110);

/// Thirteen 16-bit words, the two 32-bit fields stored high word first.
const BIN_HEADER_SIZE: usize = 26;

/// Header fields common to all variants.
#[derive(Debug, Default)]
struct Fields {
    dev: Device,
    ino: u64,
    mode: u32,
    uid: u64,
    gid: u64,
    nlink: u32,
    rdev: Device,
    mtime: i64,
    namesize: u64,
    filesize: u64,
    check: u32,
}

fn parse_field(field: &[u8], radix: u32) -> Result<u64> {
    field
        .to_str()
        .ok()
        .and_then(|s| u64::from_str_radix(s, radix).ok())
        .ok_or_else(|| {
            Error::fatal(format!("damaged cpio header: bad number {:?}", field.as_bstr()))
        })
}

fn parse_odc(buf: &[u8]) -> Result<Fields> {
    let mut h = OdcHeader::new_zeroed();
    h.as_mut_bytes().copy_from_slice(&buf[..size_of::<OdcHeader>()]);
    let num = |f: &[u8]| parse_field(f, 8);
    Ok(Fields {
        dev: Device::from_raw(num(&h.dev)?),
        ino: num(&h.ino)?,
        mode: num(&h.mode)? as u32,
        uid: num(&h.uid)?,
        gid: num(&h.gid)?,
        nlink: num(&h.nlink)? as u32,
        rdev: Device::from_raw(num(&h.rdev)?),
        mtime: num(&h.mtime)? as i64,
        namesize: num(&h.namesize)?,
        filesize: num(&h.filesize)?,
        check: 0,
    })
}

fn parse_newc(buf: &[u8]) -> Result<Fields> {
    let mut h = NewcHeader::new_zeroed();
    h.as_mut_bytes().copy_from_slice(&buf[..size_of::<NewcHeader>()]);
    let num = |f: &[u8]| parse_field(f, 16);
    Ok(Fields {
        dev: Device::new(num(&h.devmajor)? as u32, num(&h.devminor)? as u32),
        ino: num(&h.ino)?,
        mode: num(&h.mode)? as u32,
        uid: num(&h.uid)?,
        gid: num(&h.gid)?,
        nlink: num(&h.nlink)? as u32,
        rdev: Device::new(num(&h.rdevmajor)? as u32, num(&h.rdevminor)? as u32),
        mtime: num(&h.mtime)? as i64,
        namesize: num(&h.namesize)?,
        filesize: num(&h.filesize)?,
        check: num(&h.check)? as u32,
    })
}

fn parse_binary(buf: &[u8], le: bool) -> Fields {
    let word = |i: usize| {
        let b = [buf[2 * i], buf[2 * i + 1]];
        u64::from(if le { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) })
    };
    let dword = |i: usize| (word(i) << 16) | word(i + 1);
    Fields {
        dev: Device::from_raw(word(1)),
        ino: word(2),
        mode: word(3) as u32,
        uid: word(4),
        gid: word(5),
        nlink: word(6) as u32,
        rdev: Device::from_raw(word(7)),
        mtime: dword(8) as i64,
        namesize: word(10),
        filesize: dword(11),
        check: 0,
    }
}

#[derive(Debug, Default)]
pub struct Cpio {
    links: Option<LinkResolver>,
    body: Body,
    /// Expected byte sum of the current body, for the checksummed variant.
    check: Option<u32>,
    sum: u32,
}

impl Cpio {
    /// Position the stream on the next header, skipping anything that does
    /// not start with a known magic. Returns `None` at the end of input.
    fn find_header(&mut self, r: &mut Reader<'_>) -> Result<Option<(Variant, u64)>> {
        let mut skipped = 0u64;
        loop {
            let buf = r.read_ahead(6)?;
            if buf.len() < 6 {
                if buf.is_empty() && skipped == 0 {
                    return Ok(None);
                }
                bail!(Error::truncated("cpio header"));
            }
            if let Some(v) = Variant::sniff(buf) {
                return Ok(Some((v, skipped)));
            }
            let n = buf
                .windows(6)
                .position(|w| Variant::sniff(w).is_some())
                .unwrap_or(buf.len() - 5);
            r.consume(n);
            skipped += n as u64;
        }
    }
}

impl Format for Cpio {
    fn name(&self) -> &'static str {
        "cpio"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        let buf = r.read_ahead(6)?;
        Ok(match Variant::sniff(buf) {
            Some(Variant::Odc | Variant::Newc | Variant::Crc) => 48,
            Some(Variant::BinLe | Variant::BinBe) => 16,
            None => 0,
        })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        self.body = Body::default();
        self.check = None;
        self.sum = 0;

        let Some((variant, skipped)) = self.find_header(r)? else {
            return Ok(Status::Eof);
        };
        let (code, name) = variant.format();
        r.set_format(code, name);

        let hsize = variant.header_size();
        let buf = r.require(hsize, "cpio header")?;
        let h = match variant {
            Variant::Odc => parse_odc(buf)?,
            Variant::Newc | Variant::Crc => parse_newc(buf)?,
            Variant::BinLe => parse_binary(buf, true),
            Variant::BinBe => parse_binary(buf, false),
        };
        r.consume(hsize);
        trace!("cpio header {variant:?} {h:?}");

        let name_limit = r.config().long_name_size_limit;
        if h.namesize == 0 || h.namesize > name_limit {
            bail!(Error::fatal(format!(
                "damaged cpio header: invalid name size {}",
                h.namesize
            )));
        }
        let namesize = h.namesize as usize;
        let name = r.require(namesize, "cpio file name")?;
        let name = match name.find_byte(0) {
            Some(end) => &name[..end],
            None => name,
        };
        if name == TRAILER {
            // Everything after the trailer is block padding.
            return Ok(Status::Eof);
        }
        entry.set_pathname(name);
        r.consume(namesize);
        r.skip(padding(hsize as u64 + h.namesize, variant.align()))?;

        entry.set_mode(h.mode);
        entry.set_uid(h.uid);
        entry.set_gid(h.gid);
        entry.set_nlink(h.nlink);
        entry.set_mtime(Some(Timestamp::new(h.mtime, 0)));
        entry.set_dev(Some(h.dev));
        entry.set_ino(Some(h.ino));
        if matches!(
            entry.file_type(),
            Some(FileType::CharDevice | FileType::BlockDevice)
        ) {
            entry.set_rdev(h.rdev);
        }

        let data_padding = padding(h.filesize, variant.align());
        if entry.file_type() == Some(FileType::Symlink) {
            if h.filesize > name_limit {
                bail!(Error::fatal("cpio symlink target is too long"));
            }
            let len = h.filesize as usize;
            let target = r.require(len, "cpio symlink target")?.to_vec();
            r.consume(len);
            r.skip(data_padding)?;
            entry.set_symlink(target);
            entry.set_size(Some(0));
        } else {
            entry.set_size(Some(h.filesize));
            self.body = Body::new(h.filesize, data_padding);
            if variant == Variant::Crc && r.config().verify_crc {
                self.check = Some(h.check);
            }
        }

        let limit = r.config().hardlink_table_limit;
        self.links
            .get_or_insert_with(|| LinkResolver::new(limit))
            .resolve(entry);

        if skipped != 0 {
            return Ok(r.warn(format!("skipped {skipped} bytes before cpio header")));
        }
        Ok(Status::Ok)
    }

    fn read_data<'s>(&'s mut self, r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        if self.body.remaining == 0 {
            // Skips the padding.
            self.body.read(r)?;
            if let Some(expected) = self.check.take() {
                if expected != self.sum {
                    bail!(Error::warn(format!(
                        "cpio checksum mismatch: expected {expected:#x}, got {:#x}",
                        self.sum
                    )));
                }
            }
            return Ok(None);
        }
        let block = self.body.read(r)?;
        if let (Some(block), Some(_)) = (&block, self.check) {
            self.sum = block
                .data
                .iter()
                .fold(self.sum, |sum, &b| sum.wrapping_add(u32::from(b)));
        }
        Ok(block)
    }

    fn read_data_skip(&mut self, r: &mut Reader<'_>) -> Result<()> {
        self.check = None;
        self.body.skip(r)
    }

    fn cleanup(&mut self) {
        self.links = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReadArchive, Severity};

    fn newc_member(magic: &str, name: &str, mode: u32, ino: u64, nlink: u32, data: &[u8]) -> Vec<u8> {
        let check = data.iter().map(|&b| u32::from(b)).sum::<u32>();
        let mut out = format!(
            "{magic}{ino:08X}{mode:08X}{:08X}{:08X}{nlink:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{check:08X}",
            1000,
            100,
            1_700_000_000,
            data.len(),
            8,
            1,
            0,
            0,
            name.len() + 1,
        )
        .into_bytes();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.resize(out.len().next_multiple_of(4), 0);
        out.extend_from_slice(data);
        out.resize(out.len().next_multiple_of(4), 0);
        out
    }

    fn newc(name: &str, mode: u32, ino: u64, nlink: u32, data: &[u8]) -> Vec<u8> {
        newc_member("070701", name, mode, ino, nlink, data)
    }

    fn odc(name: &str, mode: u32, data: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "070707{:06o}{:06o}{mode:06o}{:06o}{:06o}{:06o}{:06o}{:011o}{:06o}{:011o}",
            0o1003,
            7,
            0,
            0,
            1,
            0,
            1_700_000_000,
            name.len() + 1,
            data.len(),
        )
        .into_bytes();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(data);
        out
    }

    fn open(data: &[u8]) -> ReadArchive<'_> {
        let mut ar = ReadArchive::new();
        ar.support_format_cpio();
        ar.open_memory(data).unwrap();
        ar
    }

    fn body(ar: &mut ReadArchive<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        ar.read_data_into(&mut out).unwrap();
        out
    }

    #[test]
    fn newc_entries_and_links() {
        let mut data = newc("dir", 0o40755, 1, 2, b"");
        data.extend(newc("dir/a", 0o100644, 5, 3, b""));
        data.extend(newc("dir/b", 0o100644, 5, 3, b""));
        data.extend(newc("dir/c", 0o100644, 5, 3, b"shared"));
        data.extend(newc("dir/sym", 0o120777, 9, 1, b"c"));
        data.extend(newc("TRAILER!!!", 0, 0, 1, b""));
        data.extend([0; 300]);

        let mut ar = open(&data);
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::CPIO_SVR4_NOCRC));
        assert!(ar.entry().is_dir());
        assert_eq!(ar.entry().hardlink(), None);

        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.entry().pathname(), "dir/a");
        assert_eq!(ar.entry().hardlink(), None);
        assert_eq!(ar.entry().ino(), Some(5));
        assert_eq!(ar.entry().dev(), Some(Device::new(8, 1)));

        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.entry().hardlink(), Some("dir/a".into()));
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.entry().hardlink(), Some("dir/a".into()));
        assert_eq!(body(&mut ar), b"shared");

        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.entry().symlink(), Some("c".into()));
        assert_eq!(ar.entry().size(), Some(0));

        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
        assert_eq!(ar.file_count(), 5);
    }

    #[test]
    fn checksum() {
        let mut good = newc_member("070702", "f", 0o100644, 2, 1, b"hello");
        good.extend(newc_member("070702", "TRAILER!!!", 0, 0, 1, b""));
        let mut ar = open(&good);
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::CPIO_SVR4_CRC));
        assert_eq!(body(&mut ar), b"hello");
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);

        let mut bad = good.clone();
        let pos = bad.find(b"hello").unwrap();
        bad[pos] = b'j';
        let mut ar = open(&bad);
        ar.read_next_header().unwrap();
        let mut buf = [0; 16];
        assert_eq!(ar.read_data(&mut buf).unwrap(), 5);
        let err = ar.read_data(&mut buf).unwrap_err();
        assert_eq!(err.severity(), Severity::Warn);
        assert_eq!(ar.read_data(&mut buf).unwrap(), 0);
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    }

    #[test]
    fn odc_and_garbage() {
        let mut data = odc("a", 0o100600, b"xyz");
        data.extend(b"junk");
        data.extend(odc("b", 0o20644, b""));
        data.extend(odc("TRAILER!!!", 0, b""));

        let mut ar = open(&data);
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::CPIO_POSIX));
        assert_eq!(ar.entry().dev(), Some(Device::new(2, 3)));
        assert_eq!(body(&mut ar), b"xyz");

        assert_eq!(ar.read_next_header().unwrap(), Status::Warn);
        assert!(ar.error_string().unwrap().contains("skipped 4 bytes"));
        assert_eq!(ar.entry().pathname(), "b");
        assert_eq!(ar.entry().file_type(), Some(FileType::CharDevice));
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    }

    #[test]
    fn binary_le() {
        let name = b"bin\0";
        let mut data = Vec::new();
        for w in [0o070707u16, 0x0801, 42, 0o100644, 0, 0, 1, 0, 0x6553, 0xF100, 4, 0, 2] {
            data.extend(w.to_le_bytes());
        }
        data.extend(name);
        data.extend(b"hi");
        let trailer_start = data.len();
        for w in [0o070707u16, 0, 0, 0, 0, 0, 1, 0, 0, 0, 11, 0, 0] {
            data.extend(w.to_le_bytes());
        }
        data.extend(b"TRAILER!!!\0\0");
        assert_eq!(trailer_start % 2, 0);

        let mut ar = open(&data);
        assert_eq!(ar.read_next_header().unwrap(), Status::Ok);
        assert_eq!(ar.format_code(), Some(FormatCode::CPIO_BIN_LE));
        let e = ar.entry();
        assert_eq!(e.pathname(), "bin");
        assert_eq!(e.ino(), Some(42));
        assert_eq!(e.mtime(), Some(Timestamp::new(0x6553_F100, 0)));
        assert_eq!(e.dev(), Some(Device::new(8, 1)));
        assert_eq!(body(&mut ar), b"hi");
        assert_eq!(ar.read_next_header().unwrap(), Status::Eof);
    }

    #[test]
    fn bids() {
        let data = newc("a", 0o100644, 1, 1, b"");
        assert_eq!(Cpio::default().bid(&mut Reader::for_test(&data), 0).unwrap(), 48);
        let data = 0o070707u16.to_be_bytes().repeat(3);
        assert_eq!(Cpio::default().bid(&mut Reader::for_test(&data), 0).unwrap(), 16);
        assert_eq!(Cpio::default().bid(&mut Reader::for_test(b"07070"), 0).unwrap(), 0);
    }
}
