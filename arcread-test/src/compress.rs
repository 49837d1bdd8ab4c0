//! Compressed wrappers for fixtures.
use std::{collections::HashMap, io::Write};

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).expect("writing to a Vec");
    enc.finish().expect("writing to a Vec")
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    enc.write_all(data).expect("writing to a Vec");
    enc.finish().expect("writing to a Vec")
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut enc = liblzma::write::XzEncoder::new(Vec::new(), 6);
    enc.write_all(data).expect("writing to a Vec");
    enc.finish().expect("writing to a Vec")
}

/// The legacy `.lzma` container.
pub fn lzma(data: &[u8]) -> Vec<u8> {
    let opts = liblzma::stream::LzmaOptions::new_preset(6).expect("valid preset");
    let stream = liblzma::stream::Stream::new_lzma_encoder(&opts).expect("encoder");
    let mut enc = liblzma::write::XzEncoder::new_stream(Vec::new(), stream);
    enc.write_all(data).expect("writing to a Vec");
    enc.finish().expect("writing to a Vec")
}

pub fn zstd(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; zstd_safe::compress_bound(data.len())];
    let len = zstd_safe::compress(&mut out[..], data, 3).expect("zstd compression");
    out.truncate(len);
    out
}

pub fn lz4(data: &[u8]) -> Vec<u8> {
    let mut enc = lz4::EncoderBuilder::new()
        .build(Vec::new())
        .expect("lz4 encoder");
    enc.write_all(data).expect("writing to a Vec");
    let (out, ret) = enc.finish();
    ret.expect("writing to a Vec");
    out
}

/// Unix `compress` with 16 bit codes in block mode, never emitting a clear
/// code. The dictionary simply stops growing once it is full.
pub fn compress(data: &[u8]) -> Vec<u8> {
    const MAX_BITS: u32 = 16;
    let mut w = CodeWriter {
        out: vec![0x1F, 0x9D, 0x80 | MAX_BITS as u8],
        acc: 0,
        nbits: 0,
        width: 9,
        peer_free: 257,
        emitted: 0,
    };

    let mut dict = HashMap::new();
    let mut next = 257u32;
    let mut prefix: Option<u32> = None;
    for &b in data {
        let Some(p) = prefix else {
            prefix = Some(b.into());
            continue;
        };
        if let Some(&code) = dict.get(&(p, b)) {
            prefix = Some(code);
            continue;
        }
        w.emit(p);
        if next < 1 << MAX_BITS {
            dict.insert((p, b), next);
            next += 1;
        }
        prefix = Some(b.into());
    }
    if let Some(p) = prefix {
        w.emit(p);
    }
    if w.nbits > 0 {
        w.out.push(w.acc as u8);
    }
    w.out
}

/// Packs codes LSB first, widening them exactly when a decoder would.
struct CodeWriter {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
    width: u32,
    /// The decoder's next free dictionary slot after the codes so far.
    peer_free: u32,
    emitted: u64,
}

impl CodeWriter {
    fn emit(&mut self, code: u32) {
        self.acc |= u64::from(code) << self.nbits;
        self.nbits += self.width;
        while self.nbits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }

        // The decoder defines an entry for every code but the first.
        if self.emitted > 0 && self.peer_free < 1 << 16 {
            self.peer_free += 1;
        }
        self.emitted += 1;
        if self.peer_free > (1 << self.width) - 1 && self.width < 16 {
            self.width += 1;
        }
    }
}
