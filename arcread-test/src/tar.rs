//! ustar headers with pax and GNU extensions.

const BLOCK: usize = 512;
const RECORD: usize = 20 * BLOCK;

/// Metadata of one member. Fields not set stay at their ustar defaults.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub mtime: u64,
    pub typeflag: u8,
    pub linkname: String,
    pub uname: String,
    pub gname: String,
    pub devmajor: u32,
    pub devminor: u32,
}

impl Header {
    pub fn new(name: &str, typeflag: u8) -> Self {
        Self {
            name: name.into(),
            mode: if typeflag == b'5' { 0o755 } else { 0o644 },
            uid: 1000,
            gid: 1000,
            size: 0,
            mtime: 1_700_000_000,
            typeflag,
            linkname: String::new(),
            uname: "user".into(),
            gname: "users".into(),
            devmajor: 0,
            devminor: 0,
        }
    }

    /// The 512 byte ustar encoding. Fields too long for it are truncated,
    /// put them in a pax header first.
    pub fn to_block(&self) -> [u8; BLOCK] {
        let mut b = [0u8; BLOCK];
        put_str(&mut b[0..100], &self.name);
        put_octal(&mut b[100..108], self.mode.into());
        put_octal(&mut b[108..116], self.uid);
        put_octal(&mut b[116..124], self.gid);
        put_octal(&mut b[124..136], self.size);
        put_octal(&mut b[136..148], self.mtime);
        b[156] = self.typeflag;
        put_str(&mut b[157..257], &self.linkname);
        b[257..263].copy_from_slice(b"ustar\0");
        b[263..265].copy_from_slice(b"00");
        put_str(&mut b[265..297], &self.uname);
        put_str(&mut b[297..329], &self.gname);
        put_octal(&mut b[329..337], self.devmajor.into());
        put_octal(&mut b[337..345], self.devminor.into());

        b[148..156].fill(b' ');
        let sum: u32 = b.iter().map(|&c| u32::from(c)).sum();
        b[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
        b
    }
}

fn put_str(field: &mut [u8], s: &str) {
    let len = s.len().min(field.len());
    field[..len].copy_from_slice(&s.as_bytes()[..len]);
}

fn put_octal(field: &mut [u8], v: u64) {
    let width = field.len() - 1;
    let s = format!("{v:0width$o}");
    assert!(s.len() <= width, "{v} does not fit in a {width} digit field");
    field[..width].copy_from_slice(s.as_bytes());
    field[width] = 0;
}

/// One `LEN key=value\n` pax record. The length counts itself.
pub fn pax_record(key: &str, value: &[u8]) -> Vec<u8> {
    let rest = key.len() + value.len() + 3;
    let mut len = rest + 1;
    while len.to_string().len() + rest > len {
        len += 1;
    }
    let mut out = format!("{len} {key}=").into_bytes();
    out.extend_from_slice(value);
    out.push(b'\n');
    assert_eq!(out.len(), len);
    out
}

/// Accumulates members of a tar archive.
#[derive(Debug, Default)]
pub struct Builder {
    out: Vec<u8>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `header` followed by `body`, overriding the header size.
    pub fn append(&mut self, header: &Header, body: &[u8]) -> &mut Self {
        let mut h = header.clone();
        h.size = body.len() as u64;
        self.out.extend_from_slice(&h.to_block());
        self.out.extend_from_slice(body);
        self.pad();
        self
    }

    pub fn file(&mut self, name: &str, body: &[u8]) -> &mut Self {
        self.append(&Header::new(name, b'0'), body)
    }

    pub fn dir(&mut self, name: &str) -> &mut Self {
        self.append(&Header::new(name, b'5'), b"")
    }

    pub fn symlink(&mut self, name: &str, target: &str) -> &mut Self {
        let mut h = Header::new(name, b'2');
        h.linkname = target.into();
        self.append(&h, b"")
    }

    pub fn hardlink(&mut self, name: &str, target: &str) -> &mut Self {
        let mut h = Header::new(name, b'1');
        h.linkname = target.into();
        self.append(&h, b"")
    }

    /// A pax extended header applying to the next member.
    pub fn pax(&mut self, records: &[(&str, &[u8])]) -> &mut Self {
        let body: Vec<u8> = records
            .iter()
            .flat_map(|(k, v)| pax_record(k, v))
            .collect();
        self.append(&Header::new("./PaxHeaders/x", b'x'), &body)
    }

    /// A GNU long name (`L`) member for the next member.
    pub fn gnu_long_name(&mut self, name: &str) -> &mut Self {
        let mut body = name.as_bytes().to_vec();
        body.push(0);
        self.append(&Header::new("././@LongLink", b'L'), &body)
    }

    /// A pax 1.0 sparse file: the map is stored in front of the data runs.
    pub fn sparse(&mut self, name: &str, size: u64, runs: &[(u64, &[u8])]) -> &mut Self {
        self.pax(&[
            ("GNU.sparse.major", b"1"),
            ("GNU.sparse.minor", b"0"),
            ("GNU.sparse.name", name.as_bytes()),
            ("GNU.sparse.realsize", size.to_string().as_bytes()),
        ]);
        let mut body = format!("{}\n", runs.len()).into_bytes();
        for (offset, data) in runs {
            body.extend_from_slice(format!("{offset}\n{}\n", data.len()).as_bytes());
        }
        body.resize(body.len().next_multiple_of(BLOCK), 0);
        for (_, data) in runs {
            body.extend_from_slice(data);
        }
        self.append(&Header::new("GNUSparseFile.0/x", b'0'), &body)
    }

    /// Raw bytes, e.g. a deliberately broken header.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.out.extend_from_slice(data);
        self
    }

    fn pad(&mut self) {
        self.out.resize(self.out.len().next_multiple_of(BLOCK), 0);
    }

    /// Terminate with two zero blocks and pad to a full record.
    pub fn finish(&mut self) -> Vec<u8> {
        self.pad();
        self.out.extend_from_slice(&[0; 2 * BLOCK]);
        self.out.resize(self.out.len().next_multiple_of(RECORD), 0);
        std::mem::take(&mut self.out)
    }
}
