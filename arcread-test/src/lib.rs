//! Writers producing small archives to run `arcread` against, and helpers
//! shared by the integration tests and the `arcread-test` binary.
//!
//! None of the writers is a general purpose archiver. Each emits just the
//! subset of its format the tests need.
use std::{fmt::Write as _, io};

use arcread::{ReadArchive, Status, entry::FileType};

pub mod ar;
pub mod compress;
pub mod cpio;
pub mod iso;
pub mod tar;
pub mod zip;

/// Route `arcread` logs to the test harness, once per process.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An entry with its complete body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub path: String,
    pub file_type: Option<FileType>,
    pub hardlink: Option<String>,
    pub symlink: Option<String>,
    pub data: Vec<u8>,
}

/// Read every entry, failing on the first error of any severity.
pub fn read_all(ar: &mut ReadArchive<'_>) -> arcread::Result<Vec<Item>> {
    let mut items = Vec::new();
    while ar.read_next_header()? != Status::Eof {
        let e = ar.entry();
        let mut item = Item {
            path: e.pathname().to_string(),
            file_type: e.file_type(),
            hardlink: e.hardlink().map(|s| s.to_string()),
            symlink: e.symlink().map(|s| s.to_string()),
            data: Vec::new(),
        };
        ar.read_data_into(&mut item.data)?;
        items.push(item);
    }
    Ok(items)
}

/// Open `data` with every filter and format registered and read it whole.
pub fn read_memory(data: &[u8]) -> arcread::Result<Vec<Item>> {
    let mut ar = ReadArchive::new();
    ar.support_filter_all().support_format_all();
    ar.open_memory(data)?;
    let items = read_all(&mut ar)?;
    ar.close()?;
    Ok(items)
}

fn mode_string(ty: Option<FileType>, perm: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(match ty {
        Some(FileType::Directory) => 'd',
        Some(FileType::Symlink) => 'l',
        Some(FileType::CharDevice) => 'c',
        Some(FileType::BlockDevice) => 'b',
        Some(FileType::Fifo) => 'p',
        Some(FileType::Socket) => 's',
        Some(FileType::Regular) | None => '-',
    });
    for shift in [6, 3, 0] {
        let bits = (perm >> shift) & 7;
        s.push(if bits & 4 != 0 { 'r' } else { '-' });
        s.push(if bits & 2 != 0 { 'w' } else { '-' });
        s.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    s
}

/// Print a verbose listing in the style of `tar -tv`.
pub fn list(ar: &mut ReadArchive<'_>, w: &mut impl io::Write) -> arcread::Result<u64> {
    loop {
        let status = ar.read_next_header()?;
        if status == Status::Eof {
            break;
        }
        let e = ar.entry();
        let mut line = format!(
            "{} {}/{} {:>10} {}",
            mode_string(e.file_type(), e.perm()),
            e.uname().map_or_else(|| e.uid().to_string(), |s| s.to_string()),
            e.gname().map_or_else(|| e.gid().to_string(), |s| s.to_string()),
            e.size().map_or_else(|| "-".to_owned(), |s| s.to_string()),
            e.pathname(),
        );
        if let Some(target) = e.hardlink() {
            let _ = write!(line, " link to {target}");
        }
        if let Some(target) = e.symlink() {
            let _ = write!(line, " -> {target}");
        }
        if status == Status::Warn {
            let _ = write!(line, " ({})", ar.error_string().unwrap_or("warning"));
        }
        writeln!(w, "{line}").map_err(arcread::Error::from)?;
    }
    Ok(ar.file_count())
}
