//! The archive handle.
use std::{
    fmt,
    fs::File,
    io::{self, Read, Seek, Write},
    path::Path,
};

use crate::{
    Entry, Error, Result, Severity, Status,
    filter::{self, FilterBidder, FilterCode},
    format::{self, Block, Format, FormatCode, Reader},
    source::{MemorySource, ReaderSource, SeekableSource, Source},
    stream::{Stream, Upstream},
};

/// Limits and knobs of a [`ReadArchive`].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) block_size: usize,
    pub(crate) header_recursion_limit: u32,
    pub(crate) pax_header_size_limit: u64,
    pub(crate) long_name_size_limit: u64,
    pub(crate) hardlink_table_limit: usize,
    pub(crate) iso_directory_limit: u64,
    pub(crate) iso_depth_limit: u32,
    pub(crate) verify_crc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // The traditional tar record size.
            block_size: 10240,
            // Some arbitrarily chosen numbers.
            header_recursion_limit: 32,
            pax_header_size_limit: 1 << 20,
            long_name_size_limit: 1 << 20,
            hardlink_table_limit: 1 << 20,
            iso_directory_limit: 64 << 20,
            iso_depth_limit: 1000,
            verify_crc: true,
        }
    }
}

impl Config {
    /// Block size of the sources created by [`ReadArchive::open_file`] and
    /// [`ReadArchive::open_reader`].
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Maximum number of chained special tar headers before an entry.
    pub fn header_recursion_limit(mut self, limit: u32) -> Self {
        self.header_recursion_limit = limit;
        self
    }

    pub fn pax_header_size_limit(mut self, limit: u64) -> Self {
        self.pax_header_size_limit = limit;
        self
    }

    /// Maximum size of GNU long name and long link bodies.
    pub fn long_name_size_limit(mut self, limit: u64) -> Self {
        self.long_name_size_limit = limit;
        self
    }

    /// Maximum number of multiply-linked inodes remembered to resolve hard
    /// links. Inodes beyond it are reported as independent files.
    pub fn hardlink_table_limit(mut self, limit: usize) -> Self {
        self.hardlink_table_limit = limit;
        self
    }

    /// Maximum total size of ISO 9660 directory extents.
    pub fn iso_directory_limit(mut self, limit: u64) -> Self {
        self.iso_directory_limit = limit;
        self
    }

    pub fn iso_depth_limit(mut self, limit: u32) -> Self {
        self.iso_depth_limit = limit;
        self
    }

    /// Verify CRC-32 checksums of gzip members and zip entries.
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Header,
    Data,
    Eof,
    Fatal,
    Closed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::New => "new",
            State::Header => "header",
            State::Data => "data",
            State::Eof => "eof",
            State::Fatal => "fatal",
            State::Closed => "closed",
        }
    }
}

/// The decoding half of the handle, split out so data blocks can borrow it
/// while the rest of the handle is updated.
struct Core<'a> {
    formats: Vec<Box<dyn Format>>,
    selected: Option<usize>,
    reader: Option<Reader<'a>>,
    state: State,
    data_done: bool,
    error: Option<String>,
}

impl<'a> Core<'a> {
    fn check_data(&self, op: &'static str) -> Result<()> {
        match self.state {
            State::Data => Ok(()),
            State::Fatal => Err(Error::fatal("archive is in a fatal state")),
            state => Err(Error::state(op, state.name())),
        }
    }

    /// Record `err` and apply the state transition its severity implies.
    fn fail(&mut self, err: &Error) {
        self.error = Some(err.to_string());
        match err.severity() {
            Severity::Fatal => self.state = State::Fatal,
            Severity::Warn if self.state == State::Data => self.data_done = true,
            _ => {}
        }
    }

    fn read_data_block(&mut self) -> Result<Option<Block<'_>>> {
        self.check_data("read data")?;
        if self.data_done {
            return Ok(None);
        }
        let Self {
            formats,
            selected,
            reader,
            state,
            data_done,
            error,
        } = self;
        let reader = reader.as_mut().expect("open archive has a reader");
        let format = &mut formats[selected.expect("data state has a format")];
        match format.read_data(reader) {
            Ok(Some(block)) => Ok(Some(block)),
            Ok(None) => {
                *data_done = true;
                Ok(None)
            }
            Err(err) => {
                *error = Some(err.to_string());
                match err.severity() {
                    Severity::Fatal => *state = State::Fatal,
                    Severity::Warn => *data_done = true,
                    _ => {}
                }
                Err(err)
            }
        }
    }

    fn skip_data(&mut self) -> Result<()> {
        if self.data_done {
            return Ok(());
        }
        let reader = self.reader.as_mut().expect("open archive has a reader");
        let format = &mut self.formats[self.selected.expect("data state has a format")];
        let ret = format.read_data_skip(reader);
        self.data_done = true;
        ret
    }
}

/// Leftover of a partially copied block for [`ReadArchive::read_data`].
#[derive(Debug, Default)]
struct CopyState {
    /// Zeroes still due before `buf`.
    hole: u64,
    buf: Vec<u8>,
    pos: usize,
    /// Entry offset of the next byte handed out.
    offset: u64,
    /// The trailing hole of a sparse entry was already accounted for.
    tail_done: bool,
}

impl CopyState {
    fn reset(&mut self) {
        self.hole = 0;
        self.buf.clear();
        self.pos = 0;
        self.offset = 0;
        self.tail_done = false;
    }
}

/// Counters kept readable after [`ReadArchive::close`].
#[derive(Debug, Default, Clone, Copy)]
struct Closed {
    filter: Option<(&'static str, FilterCode)>,
    format: Option<(&'static str, FormatCode)>,
    raw_position: u64,
    file_position: u64,
}

/// A streaming archive reader.
///
/// Register the filters and formats to recognize, open a source, then
/// alternate between [`ReadArchive::read_next_header`] and reading the entry
/// body. Unread bodies are skipped automatically.
pub struct ReadArchive<'a> {
    config: Config,
    bidders: Vec<Box<dyn FilterBidder>>,
    core: Core<'a>,
    entry: Entry,
    file_count: u64,
    header_position: u64,
    copy: CopyState,
    closed: Closed,
}

impl fmt::Debug for ReadArchive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadArchive")
            .field("state", &self.core.state)
            .field("filters", &self.bidders)
            .field("formats", &self.core.formats)
            .field("reader", &self.core.reader)
            .field("file_count", &self.file_count)
            .finish_non_exhaustive()
    }
}

impl Default for ReadArchive<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ReadArchive<'a> {
    pub fn new() -> Self {
        Self::new_with_config(Config::default())
    }

    pub fn new_with_config(config: Config) -> Self {
        Self {
            config,
            bidders: Vec::new(),
            core: Core {
                formats: Vec::new(),
                selected: None,
                reader: None,
                state: State::New,
                data_done: false,
                error: None,
            },
            entry: Entry::new(),
            file_count: 0,
            header_position: 0,
            copy: CopyState::default(),
            closed: Closed::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    //// Registration ////

    /// Register a decompression filter. Registering the same filter twice has
    /// no further effect.
    pub fn support_filter(&mut self, bidder: Box<dyn FilterBidder>) -> &mut Self {
        if !self.bidders.iter().any(|b| b.key() == bidder.key()) {
            self.bidders.push(bidder);
        }
        self
    }

    /// Register every built-in filter. Filters whose cargo feature is disabled
    /// are registered too, so their streams are recognized and fail with a
    /// clear message.
    pub fn support_filter_all(&mut self) -> &mut Self {
        for bidder in filter::builtin_bidders() {
            self.support_filter(bidder);
        }
        self
    }

    pub fn support_filter_none(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::none::NoneBidder))
    }

    pub fn support_filter_gzip(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::gzip::GzipBidder))
    }

    pub fn support_filter_bzip2(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::bzip2::Bzip2Bidder))
    }

    pub fn support_filter_compress(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::compress::CompressBidder))
    }

    pub fn support_filter_xz(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::xz::XzBidder))
    }

    pub fn support_filter_lzma(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::xz::LzmaBidder))
    }

    pub fn support_filter_zstd(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::zstd::ZstdBidder))
    }

    pub fn support_filter_lz4(&mut self) -> &mut Self {
        self.support_filter(Box::new(filter::lz4::Lz4Bidder))
    }

    /// Decompress through `sh -c cmd`. With a `signature`, the program is
    /// selected for input starting with it. Without one, it is selected for
    /// any input, unless a filter with a verified signature bids.
    #[cfg(all(unix, feature = "program"))]
    pub fn support_filter_program(&mut self, cmd: &str, signature: Option<&[u8]>) -> &mut Self {
        self.support_filter(Box::new(filter::program::ProgramBidder::new(cmd, signature)))
    }

    /// Register a format decoder. Registering the same format twice has no
    /// further effect.
    pub fn support_format(&mut self, format: Box<dyn Format>) -> &mut Self {
        if !self.core.formats.iter().any(|f| f.name() == format.name()) {
            self.core.formats.push(format);
        }
        self
    }

    /// Register every built-in format except [`raw`][Self::support_format_raw].
    pub fn support_format_all(&mut self) -> &mut Self {
        for format in format::builtin_formats() {
            self.support_format(format);
        }
        self
    }

    pub fn support_format_ar(&mut self) -> &mut Self {
        self.support_format(Box::<format::ar::Ar>::default())
    }

    pub fn support_format_cpio(&mut self) -> &mut Self {
        self.support_format(Box::<format::cpio::Cpio>::default())
    }

    pub fn support_format_empty(&mut self) -> &mut Self {
        self.support_format(Box::new(format::empty::Empty))
    }

    pub fn support_format_iso9660(&mut self) -> &mut Self {
        self.support_format(Box::<format::iso9660::Iso9660>::default())
    }

    pub fn support_format_mtree(&mut self) -> &mut Self {
        self.support_format(Box::<format::mtree::Mtree>::default())
    }

    /// The whole decoded stream as a single entry named `data`. It bids
    /// lowest, so any other registered format wins over it.
    pub fn support_format_raw(&mut self) -> &mut Self {
        self.support_format(Box::<format::raw::Raw>::default())
    }

    /// tar in all its flavors: v7, ustar, pax and GNU.
    pub fn support_format_tar(&mut self) -> &mut Self {
        self.support_format(Box::<format::tar::Tar>::default())
    }

    pub fn support_format_zip(&mut self) -> &mut Self {
        self.support_format(Box::<format::zip::Zip>::default())
    }

    //// Opening ////

    /// Open an archive over `source`, selecting the decompression filter.
    pub fn open(&mut self, source: impl Source + 'a) -> Result<()> {
        if self.core.state != State::New {
            bail!(Error::state("open", self.core.state.name()));
        }
        if self.core.formats.is_empty() {
            bail!(Error::failed("no archive format is registered"));
        }
        // Uncompressed input is always accepted.
        self.support_filter_none();

        match self.open_inner(Box::new(source)) {
            Ok(reader) => {
                self.core.reader = Some(reader);
                self.core.state = State::Header;
                Ok(())
            }
            Err(err) => {
                self.core.state = State::Fatal;
                self.core.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn open_inner(&mut self, source: Box<dyn Source + 'a>) -> Result<Reader<'a>> {
        let mut up = Upstream::new(source);
        up.open()?;

        let (idx, bid) = {
            trace_time!("filter bidding");
            let first = up.fill()?;
            let mut best = (0, 0);
            for (i, bidder) in self.bidders.iter_mut().enumerate() {
                let bid = bidder.bid(first);
                trace!("filter {:?} bids {bid}", bidder.key());
                if bid > best.1 {
                    best = (i, bid);
                }
            }
            best
        };
        if bid == 0 {
            bail!(Error::unrecognized("compression"));
        }
        let bidder = &self.bidders[idx];
        debug!("selected filter {:?} with bid {bid}", bidder.key());
        let filter = bidder.init(up, &self.config)?;
        Ok(Reader::new(Stream::new(filter), self.config.clone()))
    }

    /// Open a file on disk.
    pub fn open_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::open(path)?;
        self.open_seekable(file)
    }

    /// Open a seekable reader. Skipping entry bodies seeks instead of reading.
    pub fn open_seekable(&mut self, rdr: impl Read + Seek + 'a) -> Result<()> {
        let block_size = self.config.block_size;
        self.open(SeekableSource::new(rdr, block_size))
    }

    /// Open an in-memory archive. Uncompressed entry bodies are handed out
    /// without copying.
    pub fn open_memory(&mut self, data: &'a [u8]) -> Result<()> {
        self.open(MemorySource::new(data))
    }

    /// Open any reader, read in blocks of the configured size.
    pub fn open_reader(&mut self, rdr: impl Read + 'a) -> Result<()> {
        let block_size = self.config.block_size;
        self.open(ReaderSource::new(rdr, block_size))
    }

    //// Headers ////

    /// Advance to the next entry, skipping whatever is left of the current
    /// body. [`Status::Eof`] is returned once, and again on every later call.
    ///
    /// On [`Severity::Retry`], [`Severity::Failed`] and [`Severity::Warn`]
    /// errors the handle stays usable and the call may be repeated.
    pub fn read_next_header(&mut self) -> Result<Status> {
        match self.core.state {
            State::Header => {}
            State::Data => {
                if let Err(err) = self.core.skip_data() {
                    self.core.fail(&err);
                    return Err(err);
                }
                self.core.state = State::Header;
            }
            State::Eof => return Ok(Status::Eof),
            State::Fatal => bail!(Error::fatal("archive is in a fatal state")),
            state @ (State::New | State::Closed) => {
                bail!(Error::state("read next header", state.name()))
            }
        }

        self.entry.clear();
        self.copy.reset();
        self.core.error = None;
        self.core.data_done = false;

        match self.next_header_inner() {
            Ok(status) => {
                let reader = self.core.reader.as_mut().expect("open archive has a reader");
                self.core.error = reader.take_warning();
                match status {
                    Status::Ok | Status::Warn => {
                        self.core.state = State::Data;
                        self.file_count += 1;
                        trace!(
                            "entry {}: {:?} at {}",
                            self.file_count,
                            self.entry.pathname(),
                            self.header_position,
                        );
                    }
                    Status::Eof => {
                        debug!("end of archive after {} entries", self.file_count);
                        self.core.state = State::Eof;
                    }
                }
                Ok(status)
            }
            Err(err) => {
                self.core.fail(&err);
                Err(err)
            }
        }
    }

    fn next_header_inner(&mut self) -> Result<Status> {
        let core = &mut self.core;
        let reader = core.reader.as_mut().expect("open archive has a reader");
        let selected = match core.selected {
            Some(i) => i,
            None => {
                let i = choose_format(&mut core.formats, reader)?;
                core.selected = Some(i);
                i
            }
        };
        self.header_position = reader.position();
        core.formats[selected].read_header(reader, &mut self.entry)
    }

    /// The entry of the last successful [`ReadArchive::read_next_header`].
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// The message of the last warning or error.
    pub fn error_string(&self) -> Option<&str> {
        self.core.error.as_deref()
    }

    //// Data ////

    /// Return the next block of the current entry body, `None` after the last.
    ///
    /// For sparse entries the gaps between block offsets are holes. A
    /// [`Severity::Warn`] error means all data was delivered but failed a
    /// final check; the next call returns `None`.
    pub fn read_data_block(&mut self) -> Result<Option<Block<'_>>> {
        self.core.read_data_block()
    }

    /// Discard the rest of the current entry body.
    pub fn read_data_skip(&mut self) -> Result<()> {
        self.core.check_data("skip data")?;
        self.copy.reset();
        let ret = self.core.skip_data();
        if let Err(err) = &ret {
            self.core.fail(err);
        }
        ret
    }

    /// Copy the next bytes of the current entry body into `buf`, holes read
    /// as zeroes. Returns zero at the end of the body.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.core.check_data("read data")?;
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let copy = &mut self.copy;
            if copy.hole > 0 {
                let n = copy.hole.min(buf.len() as u64) as usize;
                buf[..n].fill(0);
                copy.hole -= n as u64;
                copy.offset += n as u64;
                return Ok(n);
            }
            if copy.pos < copy.buf.len() {
                let n = (copy.buf.len() - copy.pos).min(buf.len());
                buf[..n].copy_from_slice(&copy.buf[copy.pos..copy.pos + n]);
                copy.pos += n;
                copy.offset += n as u64;
                return Ok(n);
            }

            match self.core.read_data_block()? {
                Some(block) => {
                    let copy = &mut self.copy;
                    copy.hole = block.offset.saturating_sub(copy.offset);
                    copy.buf.clear();
                    copy.buf.extend_from_slice(block.data);
                    copy.pos = 0;
                }
                None => {
                    let copy = &mut self.copy;
                    copy.hole = trailing_hole(&self.entry, copy.offset, &mut copy.tail_done);
                    if copy.hole == 0 {
                        return Ok(0);
                    }
                }
            }
        }
    }

    /// Write the rest of the current entry body to `w`, holes as zeroes.
    /// Returns the number of bytes written.
    pub fn read_data_into(&mut self, w: &mut (impl Write + ?Sized)) -> Result<u64> {
        self.core.check_data("read data")?;
        let mut written = 0u64;

        let copy = &mut self.copy;
        write_zeroes(w, copy.hole).map_err(Error::write)?;
        w.write_all(&copy.buf[copy.pos..]).map_err(Error::write)?;
        written += copy.hole + (copy.buf.len() - copy.pos) as u64;
        copy.offset += copy.hole + (copy.buf.len() - copy.pos) as u64;
        copy.hole = 0;
        copy.buf.clear();
        copy.pos = 0;

        while let Some(block) = self.core.read_data_block()? {
            let copy = &mut self.copy;
            let gap = block.offset.saturating_sub(copy.offset);
            write_zeroes(w, gap).map_err(Error::write)?;
            w.write_all(block.data).map_err(Error::write)?;
            let n = gap + block.data.len() as u64;
            copy.offset += n;
            written += n;
        }

        let copy = &mut self.copy;
        let tail = trailing_hole(&self.entry, copy.offset, &mut copy.tail_done);
        write_zeroes(w, tail).map_err(Error::write)?;
        copy.offset += tail;
        Ok(written + tail)
    }

    /// A [`Read`] adaptor over [`ReadArchive::read_data`].
    pub fn data_reader(&mut self) -> DataReader<'_, 'a> {
        DataReader(self)
    }

    //// Positions and names ////

    /// Number of entries read so far.
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Decoded offset where the last header started.
    pub fn header_position(&self) -> u64 {
        self.header_position
    }

    /// Bytes consumed from the source so far.
    pub fn raw_position(&self) -> u64 {
        match &self.core.reader {
            Some(r) => r.raw_position(),
            None => self.closed.raw_position,
        }
    }

    /// Bytes consumed from the decoded stream so far.
    pub fn file_position(&self) -> u64 {
        match &self.core.reader {
            Some(r) => r.position(),
            None => self.closed.file_position,
        }
    }

    pub fn filter_name(&self) -> Option<&'static str> {
        self.filter().map(|(name, _)| name)
    }

    pub fn filter_code(&self) -> Option<FilterCode> {
        self.filter().map(|(_, code)| code)
    }

    fn filter(&self) -> Option<(&'static str, FilterCode)> {
        match &self.core.reader {
            Some(r) => Some((r.filter_name(), r.filter_code())),
            None => self.closed.filter,
        }
    }

    /// The selected format, refined to the variant of the last header.
    pub fn format_name(&self) -> Option<&'static str> {
        self.format().map(|(name, _)| name)
    }

    pub fn format_code(&self) -> Option<FormatCode> {
        self.format().map(|(_, code)| code)
    }

    fn format(&self) -> Option<(&'static str, FormatCode)> {
        match &self.core.reader {
            Some(r) if self.core.selected.is_some() => Some((r.format_name(), r.format_code())),
            Some(_) => None,
            None => self.closed.format,
        }
    }

    //// Teardown ////

    /// Release the source. Names and positions stay readable. Closing twice
    /// is harmless.
    pub fn close(&mut self) -> Result<()> {
        if self.core.state == State::Closed {
            return Ok(());
        }
        self.closed = Closed {
            filter: self.filter(),
            format: self.format(),
            raw_position: self.raw_position(),
            file_position: self.file_position(),
        };
        self.core.state = State::Closed;
        for format in &mut self.core.formats {
            format.cleanup();
        }
        match self.core.reader.take() {
            Some(mut reader) => reader.stream_mut().close(),
            None => Ok(()),
        }
    }

    /// Close and drop the handle.
    pub fn finish(mut self) -> Result<()> {
        self.close()
    }
}

impl Drop for ReadArchive<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!("error while closing archive: {err}");
        }
    }
}

fn choose_format(formats: &mut [Box<dyn Format>], reader: &mut Reader<'_>) -> Result<usize> {
    trace_time!("format bidding");
    let mut best: Option<(usize, u32)> = None;
    for (i, format) in formats.iter_mut().enumerate() {
        let best_bid = best.map_or(0, |(_, bid)| bid);
        let bid = format.bid(reader, best_bid)?;
        trace!("format {} bids {bid}", format.name());
        if bid > best_bid {
            best = Some((i, bid));
        }
    }
    let Some((i, bid)) = best else {
        bail!(Error::unrecognized("archive format"));
    };
    let name = formats[i].name();
    debug!("selected format {name} with bid {bid}");
    reader.set_format(reader.format_code(), name);
    Ok(i)
}

/// Zeroes owed after the last block of a sparse entry whose final hole runs
/// up to the entry size. Returned at most once per entry.
fn trailing_hole(entry: &Entry, offset: u64, done: &mut bool) -> u64 {
    if std::mem::replace(done, true) || entry.sparse().is_empty() {
        return 0;
    }
    entry.size().map_or(0, |size| size.saturating_sub(offset))
}

fn write_zeroes(w: &mut (impl Write + ?Sized), mut n: u64) -> io::Result<()> {
    const ZEROES: [u8; 4096] = [0; 4096];
    while n > 0 {
        let len = n.min(ZEROES.len() as u64) as usize;
        w.write_all(&ZEROES[..len])?;
        n -= len as u64;
    }
    Ok(())
}

/// Reads the current entry body, see [`ReadArchive::data_reader`].
#[derive(Debug)]
pub struct DataReader<'r, 'a>(&'r mut ReadArchive<'a>);

impl Read for DataReader<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.0.read_data(buf)?)
    }
}

#[cfg(test)]
mod tests;
