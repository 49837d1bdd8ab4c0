//! gzip (RFC 1952), possibly with several concatenated members.
use super::{Filter, FilterBidder, signature_bits};
#[cfg(feature = "gzip")]
use super::{Codec, CodecFilter, FilterCode, Progress};
use crate::{Error, Result, archive::Config, stream::Upstream};

const MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

const FLAG_HCRC: u8 = 1 << 1;
const FLAG_EXTRA: u8 = 1 << 2;
const FLAG_NAME: u8 = 1 << 3;
const FLAG_COMMENT: u8 = 1 << 4;
const FLAG_RESERVED: u8 = 0xE0;

#[derive(Debug)]
pub struct GzipBidder;

impl FilterBidder for GzipBidder {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        let bits = signature_bits(buf, &MAGIC);
        if bits < 24 {
            return bits;
        }
        match buf.get(3) {
            Some(flags) if flags & FLAG_RESERVED != 0 => 0,
            Some(_) => bits + 3,
            None => bits,
        }
    }

    #[cfg(feature = "gzip")]
    fn init<'a>(&self, mut upstream: Upstream<'a>, config: &Config) -> Result<Box<dyn Filter + 'a>> {
        let mut magic = [0u8; 3];
        if upstream.read_up_to(&mut magic)? != 3 || magic != MAGIC {
            bail!(Error::fatal("invalid gzip header"));
        }
        read_header_after_magic(&mut upstream)?;
        let codec = GzipCodec {
            inflate: Inflate::new(),
            crc: crc32fast::Hasher::new(),
            size: 0,
            verify_crc: config.verify_crc,
        };
        Ok(Box::new(CodecFilter::new(
            "gzip",
            FilterCode::GZIP,
            upstream,
            codec,
        )))
    }

    #[cfg(not(feature = "gzip"))]
    fn init<'a>(&self, _upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        Err(Error::feature_disabled("gzip", "gzip"))
    }
}

#[cfg(feature = "gzip")]
fn skip_until_nul(up: &mut Upstream<'_>) -> Result<()> {
    loop {
        let buf = up.fill()?;
        if buf.is_empty() {
            bail!(Error::truncated("gzip header"));
        }
        match buf.iter().position(|&b| b == 0) {
            Some(pos) => {
                up.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                up.consume(len);
            }
        }
    }
}

#[cfg(feature = "gzip")]
fn read_header_after_magic(up: &mut Upstream<'_>) -> Result<()> {
    // flags, mtime, extra flags, OS.
    let mut rest = [0u8; 7];
    if up.read_up_to(&mut rest)? != rest.len() {
        bail!(Error::truncated("gzip header"));
    }
    let flags = rest[0];
    if flags & FLAG_RESERVED != 0 {
        bail!(Error::fatal("gzip header has reserved flags set"));
    }
    if flags & FLAG_EXTRA != 0 {
        let mut len = [0u8; 2];
        if up.read_up_to(&mut len)? != 2 {
            bail!(Error::truncated("gzip header"));
        }
        let len = u64::from(u16::from_le_bytes(len));
        if up.skip(len)? != len {
            bail!(Error::truncated("gzip header"));
        }
    }
    if flags & FLAG_NAME != 0 {
        skip_until_nul(up)?;
    }
    if flags & FLAG_COMMENT != 0 {
        skip_until_nul(up)?;
    }
    if flags & FLAG_HCRC != 0 && up.skip(2)? != 2 {
        bail!(Error::truncated("gzip header"));
    }
    Ok(())
}

/// Raw deflate (RFC 1951), also used by zip entries.
#[cfg(feature = "gzip")]
pub(crate) struct Inflate(flate2::Decompress);

#[cfg(feature = "gzip")]
impl Inflate {
    pub(crate) fn new() -> Self {
        Self(flate2::Decompress::new(false))
    }

    pub(crate) fn reset(&mut self) {
        self.0.reset(false);
    }
}

#[cfg(feature = "gzip")]
impl Codec for Inflate {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let (in0, out0) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .decompress(input, output, flate2::FlushDecompress::None)
            .map_err(|err| Error::decompress("deflate", err))?;
        Ok(Progress {
            consumed: (self.0.total_in() - in0) as usize,
            produced: (self.0.total_out() - out0) as usize,
            stream_end: status == flate2::Status::StreamEnd,
        })
    }
}

#[cfg(feature = "gzip")]
struct GzipCodec {
    inflate: Inflate,
    crc: crc32fast::Hasher,
    size: u64,
    verify_crc: bool,
}

#[cfg(feature = "gzip")]
impl Codec for GzipCodec {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let p = self.inflate.decode(input, output)?;
        self.crc.update(&output[..p.produced]);
        self.size += p.produced as u64;
        Ok(p)
    }

    fn next_member(&mut self, up: &mut Upstream<'_>) -> Result<bool> {
        let mut trailer = [0u8; 8];
        if up.read_up_to(&mut trailer)? != trailer.len() {
            bail!(Error::truncated("gzip trailer"));
        }
        let crc = u32::from_le_bytes(trailer[..4].try_into().expect("4 bytes"));
        let isize = u32::from_le_bytes(trailer[4..].try_into().expect("4 bytes"));
        let computed = std::mem::take(&mut self.crc).finalize();
        if self.verify_crc && crc != computed {
            bail!(Error::fatal(format!(
                "gzip CRC mismatch, expect {crc:#010x} but got {computed:#010x}"
            )));
        }
        if isize != self.size as u32 {
            bail!(Error::fatal(format!(
                "gzip size mismatch, expect {isize} but got {}",
                self.size as u32
            )));
        }

        let mut magic = [0u8; 3];
        let len = up.read_up_to(&mut magic)?;
        if len == 0 {
            return Ok(false);
        }
        if magic[..len] != MAGIC[..len] || len < MAGIC.len() {
            debug!("gzip: ignoring {len}+ bytes of trailing garbage");
            return Ok(false);
        }
        read_header_after_magic(up)?;
        self.inflate.reset();
        self.size = 0;
        trace!("gzip: next member at raw offset {}", up.position());
        Ok(true)
    }
}
