//! Unix `compress` (`.Z`), an adaptive LZW code stream.
//!
//! Codes are packed LSB first and widen from 9 bits up to the maximum given in
//! the header. In block mode, code 256 clears the dictionary; the original
//! writer then padded its output to a multiple of the code width, which must
//! be skipped.
use super::{Codec, CodecFilter, Filter, FilterBidder, FilterCode, Progress, signature_bits};
use crate::{Error, Result, archive::Config, stream::Upstream};

const MAGIC: [u8; 2] = [0x1F, 0x9D];
const FLAG_BLOCK_MODE: u8 = 0x80;
const FLAG_RESERVED: u8 = 0x60;
const MAX_BITS_MASK: u8 = 0x1F;

const CLEAR_CODE: u32 = 256;

#[derive(Debug)]
pub struct CompressBidder;

impl FilterBidder for CompressBidder {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        let bits = signature_bits(buf, &MAGIC);
        if bits < 16 {
            return bits;
        }
        match buf.get(2) {
            Some(flags) if flags & FLAG_RESERVED != 0 => 0,
            Some(flags) if !(9..=16).contains(&(flags & MAX_BITS_MASK)) => 0,
            Some(_) => bits + 2,
            None => bits,
        }
    }

    fn init<'a>(&self, mut upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        let mut header = [0u8; 3];
        if upstream.read_up_to(&mut header)? != header.len() || header[..2] != MAGIC {
            bail!(Error::fatal("invalid compress header"));
        }
        let lzw = Lzw::new(header[2])?;
        Ok(Box::new(CodecFilter::new(
            "compress",
            FilterCode::COMPRESS,
            upstream,
            lzw,
        )))
    }
}

pub(crate) struct Lzw {
    max_bits: u32,
    /// One past the largest code the dictionary may hold.
    max_code: u32,
    block_mode: bool,

    bits: u32,
    section_end_code: u32,
    free_ent: u32,
    old_code: Option<u32>,
    fin_byte: u8,
    prefix: Box<[u16]>,
    suffix: Box<[u8]>,
    /// Decoded bytes of the current code, in reverse order.
    stack: Vec<u8>,

    bit_buffer: u32,
    bits_avail: u32,
    bytes_in_section: u32,
    junk_bytes: u32,
}

impl Lzw {
    pub(crate) fn new(flags: u8) -> Result<Self> {
        let max_bits = u32::from(flags & MAX_BITS_MASK);
        if flags & FLAG_RESERVED != 0 || !(9..=16).contains(&max_bits) {
            bail!(Error::fatal(format!(
                "invalid compress flags {flags:#04x}"
            )));
        }
        let block_mode = flags & FLAG_BLOCK_MODE != 0;
        let max_code = 1u32 << max_bits;
        let mut this = Self {
            max_bits,
            max_code,
            block_mode,
            bits: 0,
            section_end_code: 0,
            free_ent: 0,
            old_code: None,
            fin_byte: 0,
            prefix: vec![0u16; max_code as usize].into_boxed_slice(),
            suffix: vec![0u8; max_code as usize].into_boxed_slice(),
            stack: Vec::new(),
            bit_buffer: 0,
            bits_avail: 0,
            bytes_in_section: 0,
            junk_bytes: 0,
        };
        this.reset();
        for b in 0..256 {
            this.suffix[b] = b as u8;
        }
        Ok(this)
    }

    fn reset(&mut self) {
        self.bits = 9;
        self.section_end_code = (1 << self.bits) - 1;
        self.free_ent = if self.block_mode { 257 } else { 256 };
        self.old_code = None;
        self.bytes_in_section = 0;
    }

    /// Pull `self.bits` bits from `input`, or return `None` if it runs out.
    fn get_code(&mut self, input: &[u8], consumed: &mut usize) -> Option<u32> {
        while self.junk_bytes > 0 {
            input.get(*consumed)?;
            *consumed += 1;
            self.junk_bytes -= 1;
        }
        while self.bits_avail < self.bits {
            let b = *input.get(*consumed)?;
            *consumed += 1;
            self.bit_buffer |= u32::from(b) << self.bits_avail;
            self.bits_avail += 8;
            self.bytes_in_section += 1;
        }
        let code = self.bit_buffer & ((1 << self.bits) - 1);
        self.bit_buffer >>= self.bits;
        self.bits_avail -= self.bits;
        Some(code)
    }

    fn process(&mut self, code: u32) -> Result<()> {
        if code == CLEAR_CODE && self.block_mode {
            // Yes, the number of bytes to skip depends on the code width.
            self.junk_bytes = (self.bits - self.bytes_in_section % self.bits) % self.bits;
            self.bit_buffer = 0;
            self.bits_avail = 0;
            self.reset();
            return Ok(());
        }

        if code > self.free_ent || (code == self.free_ent && self.old_code.is_none()) {
            bail!(Error::decompress_msg("compress", "invalid code"));
        }

        let mut c = code;
        if c == self.free_ent {
            // The KwKwK case: the code being defined right now.
            self.stack.push(self.fin_byte);
            c = self.old_code.expect("checked above");
        }
        while c >= 256 {
            self.stack.push(self.suffix[c as usize]);
            c = u32::from(self.prefix[c as usize]);
        }
        self.fin_byte = c as u8;
        self.stack.push(self.fin_byte);

        if let Some(old) = self.old_code {
            if self.free_ent < self.max_code {
                self.prefix[self.free_ent as usize] = old as u16;
                self.suffix[self.free_ent as usize] = self.fin_byte;
                self.free_ent += 1;
            }
        }
        if self.free_ent > self.section_end_code && self.bits < self.max_bits {
            self.bits += 1;
            self.bytes_in_section = 0;
            self.section_end_code = if self.bits == self.max_bits {
                self.max_code
            } else {
                (1 << self.bits) - 1
            };
        }
        self.old_code = Some(code);
        Ok(())
    }
}

impl Codec for Lzw {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let mut consumed = 0;
        let mut produced = 0;
        loop {
            while produced < output.len() {
                let Some(b) = self.stack.pop() else { break };
                output[produced] = b;
                produced += 1;
            }
            if produced == output.len() {
                break;
            }
            let Some(code) = self.get_code(input, &mut consumed) else {
                break;
            };
            self.process(code)?;
        }
        Ok(Progress {
            consumed,
            produced,
            // There is no end marker, the stream simply ends. Trailing bits
            // shorter than a code are padding.
            stream_end: input.is_empty() && self.stack.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(flags: u8, data: &[u8]) -> Vec<u8> {
        let mut lzw = Lzw::new(flags).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        let mut input = data;
        loop {
            let p = lzw.decode(input, &mut buf).unwrap();
            out.extend_from_slice(&buf[..p.produced]);
            input = &input[p.consumed..];
            if p.stream_end {
                return out;
            }
        }
    }

    fn pack(codes: &[u32], bits: u32) -> Vec<u8> {
        let (mut acc, mut nbits, mut out) = (0u64, 0u32, Vec::new());
        for &c in codes {
            acc |= u64::from(c) << nbits;
            nbits += bits;
            while nbits >= 8 {
                out.push(acc as u8);
                acc >>= 8;
                nbits -= 8;
            }
        }
        if nbits > 0 {
            out.push(acc as u8);
        }
        out
    }

    #[test]
    fn literal_and_kwkwk() {
        // "abababa": a b 257(ab) 259(aba, defined by itself).
        let data = pack(&[b'a' as u32, b'b' as u32, 257, 259], 9);
        assert_eq!(decode_all(0x90, &data), b"abababa");
    }

    #[test]
    fn invalid_code() {
        let data = pack(&[b'a' as u32, 300], 9);
        let mut lzw = Lzw::new(0x90).unwrap();
        let mut buf = [0u8; 16];
        assert!(lzw.decode(&data, &mut buf).is_err());
    }

    #[test]
    fn reserved_flags() {
        assert!(Lzw::new(0x70).is_err());
        assert!(Lzw::new(0x88).is_err());
        assert_eq!(CompressBidder.bid(b"\x1f\x9d\x90"), 18);
        assert_eq!(CompressBidder.bid(b"\x1f\x9d\xf0"), 0);
    }
}
