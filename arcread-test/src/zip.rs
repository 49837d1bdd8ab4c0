//! Zip archives with stored and deflated entries.
use std::io::Write;

use flate2::{Compression, write::DeflateEncoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflated,
}

/// DOS date and time of 2024-03-15 12:34:56.
const DOS_TIME: u16 = (12 << 11) | (34 << 5) | (56 / 2);
const DOS_DATE: u16 = ((2024 - 1980) << 9) | (3 << 5) | 15;

#[derive(Debug)]
struct Central {
    name: String,
    flags: u16,
    method: u16,
    crc: u32,
    csize: u32,
    usize: u32,
    offset: u32,
}

#[derive(Debug, Default)]
pub struct Builder {
    out: Vec<u8>,
    central: Vec<Central>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. With `length_at_end`, sizes and CRC are written to a
    /// data descriptor after the data instead of the local header.
    pub fn entry(&mut self, name: &str, body: &[u8], method: Method, length_at_end: bool) -> &mut Self {
        let data = match method {
            Method::Stored => body.to_vec(),
            Method::Deflated => {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(body).expect("writing to a Vec");
                enc.finish().expect("writing to a Vec")
            }
        };
        let crc = crc32fast::hash(body);
        let flags: u16 = if length_at_end { 1 << 3 } else { 0 };
        let method_id: u16 = match method {
            Method::Stored => 0,
            Method::Deflated => 8,
        };
        let (csize, usize) = (data.len() as u32, body.len() as u32);
        let offset = self.out.len() as u32;

        let out = &mut self.out;
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&method_id.to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        for v in if length_at_end { [0; 3] } else { [crc, csize, usize] } {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&data);
        if length_at_end {
            out.extend_from_slice(b"PK\x07\x08");
            for v in [crc, csize, usize] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }

        self.central.push(Central {
            name: name.into(),
            flags,
            method: method_id,
            crc,
            csize,
            usize,
            offset,
        });
        self
    }

    /// Write the central directory and its end record.
    pub fn finish(&mut self) -> Vec<u8> {
        let start = self.out.len() as u32;
        let out = &mut self.out;
        for c in &self.central {
            out.extend_from_slice(b"PK\x01\x02");
            out.extend_from_slice(&[20, 3, 20, 0]);
            out.extend_from_slice(&c.flags.to_le_bytes());
            out.extend_from_slice(&c.method.to_le_bytes());
            out.extend_from_slice(&DOS_TIME.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            for v in [c.crc, c.csize, c.usize] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(&(c.name.len() as u16).to_le_bytes());
            // Extra, comment, disk, internal and external attributes.
            out.extend_from_slice(&[0; 2 + 2 + 2 + 2 + 4]);
            out.extend_from_slice(&c.offset.to_le_bytes());
            out.extend_from_slice(c.name.as_bytes());
        }
        let size = out.len() as u32 - start;
        let count = self.central.len() as u16;
        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        self.central.clear();
        std::mem::take(&mut self.out)
    }
}
