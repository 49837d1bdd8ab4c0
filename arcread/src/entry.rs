//! The format-independent description of one archive member.
use bstr::{BStr, BString, ByteSlice};

mod acl;

pub use acl::{AclEntry, AclTag, AclType, Perm};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub fn from_mode(mode: u32) -> Option<Self> {
        Some(match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            _ => return None,
        })
    }

    pub fn to_mode_bits(self) -> u32 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
        }
    }
}

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl Timestamp {
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }
}

/// A device number split into major and minor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub major: u32,
    pub minor: u32,
}

impl Device {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Split a packed `dev_t` using the glibc encoding, which agrees with the
    /// traditional 8:8 split for small numbers.
    pub fn from_raw(raw: u64) -> Self {
        let major = ((raw >> 8) & 0xfff) | ((raw >> 32) & !0xfff);
        let minor = (raw & 0xff) | ((raw >> 12) & !0xff);
        Self {
            major: major as u32,
            minor: minor as u32,
        }
    }

    pub fn to_raw(self) -> u64 {
        let (major, minor) = (u64::from(self.major), u64::from(self.minor));
        ((major & 0xfff) << 8)
            | ((major & !0xfff) << 32)
            | (minor & 0xff)
            | ((minor & !0xff) << 12)
    }
}

/// One run of stored bytes in a sparse file. Everything between runs, and
/// after the last run up to the entry size, is a hole of zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseRun {
    pub offset: u64,
    pub length: u64,
}

/// Metadata of an archive member.
///
/// The archive handle reuses a single `Entry` across headers, clone it to keep
/// one past the next [`ReadArchive::read_next_header`][crate::ReadArchive::read_next_header].
#[derive(Debug, Default, Clone)]
pub struct Entry {
    pathname: BString,
    hardlink: Option<BString>,
    symlink: Option<BString>,
    size: Option<u64>,
    mode: u32,
    uid: u64,
    gid: u64,
    uname: Option<BString>,
    gname: Option<BString>,
    atime: Option<Timestamp>,
    mtime: Option<Timestamp>,
    ctime: Option<Timestamp>,
    birthtime: Option<Timestamp>,
    dev: Option<Device>,
    rdev: Device,
    ino: Option<u64>,
    nlink: u32,
    fflags: Option<BString>,
    encrypted: bool,
    acl: Vec<AclEntry>,
    xattrs: Vec<(BString, Vec<u8>)>,
    sparse: Vec<SparseRun>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every field, keeping allocations.
    pub fn clear(&mut self) {
        self.pathname.clear();
        self.hardlink = None;
        self.symlink = None;
        self.size = None;
        self.mode = 0;
        self.uid = 0;
        self.gid = 0;
        self.uname = None;
        self.gname = None;
        self.atime = None;
        self.mtime = None;
        self.ctime = None;
        self.birthtime = None;
        self.dev = None;
        self.rdev = Device::default();
        self.ino = None;
        self.nlink = 0;
        self.fflags = None;
        self.encrypted = false;
        self.acl.clear();
        self.xattrs.clear();
        self.sparse.clear();
    }

    pub fn pathname(&self) -> &BStr {
        self.pathname.as_bstr()
    }

    /// The path as UTF-8, if it is valid UTF-8.
    pub fn pathname_utf8(&self) -> Option<&str> {
        self.pathname.to_str().ok()
    }

    pub fn set_pathname(&mut self, path: impl AsRef<[u8]>) {
        self.pathname.clear();
        self.pathname.extend_from_slice(path.as_ref());
    }

    /// Target of a hard link. A hard link entry carries no body of its own
    /// unless the format says otherwise.
    pub fn hardlink(&self) -> Option<&BStr> {
        self.hardlink.as_ref().map(|s| s.as_bstr())
    }

    pub fn set_hardlink(&mut self, target: impl AsRef<[u8]>) {
        self.hardlink = Some(BString::from(target.as_ref()));
    }

    pub fn symlink(&self) -> Option<&BStr> {
        self.symlink.as_ref().map(|s| s.as_bstr())
    }

    pub fn set_symlink(&mut self, target: impl AsRef<[u8]>) {
        self.symlink = Some(BString::from(target.as_ref()));
    }

    /// Size of the entry body, `None` if the container does not know it upfront.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: Option<u64>) {
        self.size = size;
    }

    /// Full `st_mode`, file type bits included.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
    }

    pub fn perm(&self) -> u32 {
        self.mode & !S_IFMT
    }

    pub fn set_perm(&mut self, perm: u32) {
        self.mode = (self.mode & S_IFMT) | (perm & !S_IFMT);
    }

    /// `None` if the container did not encode a type, e.g. tar hard links.
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    pub fn set_file_type(&mut self, ty: Option<FileType>) {
        self.mode = (self.mode & !S_IFMT) | ty.map_or(0, FileType::to_mode_bits);
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn set_uid(&mut self, uid: u64) {
        self.uid = uid;
    }

    pub fn gid(&self) -> u64 {
        self.gid
    }

    pub fn set_gid(&mut self, gid: u64) {
        self.gid = gid;
    }

    pub fn uname(&self) -> Option<&BStr> {
        self.uname.as_ref().map(|s| s.as_bstr())
    }

    pub fn set_uname(&mut self, name: impl AsRef<[u8]>) {
        self.uname = Some(BString::from(name.as_ref()));
    }

    pub fn gname(&self) -> Option<&BStr> {
        self.gname.as_ref().map(|s| s.as_bstr())
    }

    pub fn set_gname(&mut self, name: impl AsRef<[u8]>) {
        self.gname = Some(BString::from(name.as_ref()));
    }

    pub fn atime(&self) -> Option<Timestamp> {
        self.atime
    }

    pub fn set_atime(&mut self, t: Option<Timestamp>) {
        self.atime = t;
    }

    pub fn mtime(&self) -> Option<Timestamp> {
        self.mtime
    }

    pub fn set_mtime(&mut self, t: Option<Timestamp>) {
        self.mtime = t;
    }

    pub fn ctime(&self) -> Option<Timestamp> {
        self.ctime
    }

    pub fn set_ctime(&mut self, t: Option<Timestamp>) {
        self.ctime = t;
    }

    pub fn birthtime(&self) -> Option<Timestamp> {
        self.birthtime
    }

    pub fn set_birthtime(&mut self, t: Option<Timestamp>) {
        self.birthtime = t;
    }

    /// The device holding the original file.
    pub fn dev(&self) -> Option<Device> {
        self.dev
    }

    pub fn set_dev(&mut self, dev: Option<Device>) {
        self.dev = dev;
    }

    /// The device a character or block special file refers to.
    pub fn rdev(&self) -> Device {
        self.rdev
    }

    pub fn set_rdev(&mut self, rdev: Device) {
        self.rdev = rdev;
    }

    pub fn ino(&self) -> Option<u64> {
        self.ino
    }

    pub fn set_ino(&mut self, ino: Option<u64>) {
        self.ino = ino;
    }

    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    pub fn set_nlink(&mut self, nlink: u32) {
        self.nlink = nlink;
    }

    /// File flags in their textual form, e.g. `uchg,nodump`.
    pub fn fflags(&self) -> Option<&BStr> {
        self.fflags.as_ref().map(|s| s.as_bstr())
    }

    pub fn set_fflags(&mut self, text: impl AsRef<[u8]>) {
        self.fflags = Some(BString::from(text.as_ref()));
    }

    /// Whether the body is encrypted and cannot be read.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        self.encrypted = encrypted;
    }

    pub fn xattrs(&self) -> impl ExactSizeIterator<Item = (&BStr, &[u8])> + '_ {
        self.xattrs
            .iter()
            .map(|(name, value)| (name.as_bstr(), &value[..]))
    }

    pub fn add_xattr(&mut self, name: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) {
        self.xattrs
            .push((BString::from(name.as_ref()), value.into()));
    }

    pub fn sparse(&self) -> &[SparseRun] {
        &self.sparse
    }

    /// Append a data run. A run directly following the previous one is merged
    /// into it and empty runs are dropped.
    pub fn add_sparse(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        if let Some(last) = self.sparse.last_mut() {
            if last.offset + last.length == offset {
                last.length += length;
                return;
            }
        }
        self.sparse.push(SparseRun { offset, length });
    }

    pub fn clear_sparse(&mut self) {
        self.sparse.clear();
    }
}

#[cfg(test)]
mod tests;
