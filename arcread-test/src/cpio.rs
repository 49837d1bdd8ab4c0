//! SVR4 (`newc`) and portable ASCII (`odc`) cpio members.

/// Metadata of one member.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub dev: (u32, u32),
    pub rdev: (u32, u32),
}

impl Member {
    pub fn new(name: &str, mode: u32, ino: u32) -> Self {
        Self {
            name: name.into(),
            ino,
            mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 1_700_000_000,
            dev: (8, 1),
            rdev: (0, 0),
        }
    }

    pub fn nlink(mut self, nlink: u32) -> Self {
        self.nlink = nlink;
        self
    }
}

fn pad4(out: &mut Vec<u8>) {
    out.resize(out.len().next_multiple_of(4), 0);
}

/// Append a `070701` member. With `crc`, the `070702` variant carrying the
/// byte sum of the body is written instead.
pub fn newc(out: &mut Vec<u8>, m: &Member, body: &[u8], crc: bool) {
    let sum = if crc {
        body.iter().fold(0u32, |acc, &b| acc.wrapping_add(b.into()))
    } else {
        0
    };
    let header = format!(
        "{}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
        if crc { "070702" } else { "070701" },
        m.ino,
        m.mode,
        m.uid,
        m.gid,
        m.nlink,
        m.mtime,
        body.len(),
        m.dev.0,
        m.dev.1,
        m.rdev.0,
        m.rdev.1,
        m.name.len() + 1,
        sum,
    );
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(m.name.as_bytes());
    out.push(0);
    pad4(out);
    out.extend_from_slice(body);
    pad4(out);
}

/// Append an unpadded `070707` member.
pub fn odc(out: &mut Vec<u8>, m: &Member, body: &[u8]) {
    let dev = (m.dev.0 << 8) | m.dev.1;
    let rdev = (m.rdev.0 << 8) | m.rdev.1;
    let header = format!(
        "070707{dev:06o}{:06o}{:06o}{:06o}{:06o}{:06o}{rdev:06o}{:011o}{:06o}{:011o}",
        m.ino,
        m.mode,
        m.uid,
        m.gid,
        m.nlink,
        m.mtime,
        m.name.len() + 1,
        body.len(),
    );
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(m.name.as_bytes());
    out.push(0);
    out.extend_from_slice(body);
}

/// Build a `newc` archive including the trailer.
pub fn newc_archive(members: &[(Member, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (m, body) in members {
        newc(&mut out, m, body, false);
    }
    newc(&mut out, &Member::new("TRAILER!!!", 0, 0), b"", false);
    out.resize(out.len().next_multiple_of(512), 0);
    out
}
