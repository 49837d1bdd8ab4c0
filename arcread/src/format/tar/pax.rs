//! pax extended header records and the attributes they carry.
use bstr::{BString, ByteSlice};

use crate::entry::{AclType, Device, Entry, Timestamp};

/// Split a pax extended header body into `(key, value)` records of the form
/// `"<len> <key>=<value>\n"`, where `<len>` counts the whole record.
pub(super) fn parse_records(mut body: &[u8]) -> Result<Vec<(&[u8], &[u8])>, &'static str> {
    let mut records = Vec::new();
    // Some writers pad the body with NULs.
    while let Some(&first) = body.first() {
        if first == 0 {
            break;
        }
        let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 || body.get(digits) != Some(&b' ') {
            return Err("invalid pax record length");
        }
        let len = body[..digits]
            .to_str()
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&len| len > digits + 1 && len <= body.len())
            .ok_or("invalid pax record length")?;
        let record = &body[digits + 1..len];
        let Some(record) = record.strip_suffix(b"\n") else {
            return Err("pax record is not terminated by a newline");
        };
        let eq = record.find_byte(b'=').ok_or("pax record has no `=`")?;
        let (key, value) = (&record[..eq], &record[eq + 1..]);
        if key.is_empty() {
            return Err("pax record has an empty key");
        }
        records.push((key, value));
        body = &body[len..];
    }
    Ok(records)
}

/// Attributes that do not map onto an entry field directly and are resolved
/// once the ordinary header is known.
#[derive(Debug, Default)]
pub(super) struct PaxExt {
    pub size: Option<u64>,
    pub linkpath: Option<BString>,
    pub realsize: Option<u64>,
    pub sparse_major: Option<u64>,
    pub sparse_minor: Option<u64>,
    pub sparse_name: Option<BString>,
    /// Runs from `GNU.sparse.offset`/`numbytes` (0.0) or `GNU.sparse.map` (0.1).
    pub sparse_map: Vec<(u64, u64)>,
    sparse_offset: Option<u64>,
    /// The first malformed attribute, reported as a warning.
    pub warning: Option<String>,
}

impl PaxExt {
    fn warn(&mut self, msg: String) {
        self.warning.get_or_insert(msg);
    }

    /// GNU sparse 1.0 keeps the map at the start of the body.
    pub fn sparse_map_in_body(&self) -> bool {
        self.sparse_major == Some(1) && matches!(self.sparse_minor, None | Some(0))
    }

    /// Apply one attribute. Unknown keys are ignored.
    pub fn apply(&mut self, entry: &mut Entry, key: &[u8], value: &[u8]) {
        trace!("pax: {}={}", key.as_bstr(), value.as_bstr());
        // An empty value only cancels a global attribute of the same key.
        if value.is_empty() {
            return;
        }
        match key {
            b"path" => entry.set_pathname(value),
            b"linkpath" => self.linkpath = Some(value.into()),
            b"size" => match parse_decimal(value) {
                Some(size) => self.size = Some(size),
                None => self.warn(format!("invalid pax size {:?}", value.as_bstr())),
            },
            b"uid" => self.set_num(value, "uid", |v| entry.set_uid(v)),
            b"gid" => self.set_num(value, "gid", |v| entry.set_gid(v)),
            b"uname" => entry.set_uname(value),
            b"gname" => entry.set_gname(value),
            b"mtime" => self.set_time(value, "mtime", |t| entry.set_mtime(Some(t))),
            b"atime" => self.set_time(value, "atime", |t| entry.set_atime(Some(t))),
            b"ctime" => self.set_time(value, "ctime", |t| entry.set_ctime(Some(t))),
            b"LIBARCHIVE.creationtime" => {
                self.set_time(value, "creationtime", |t| entry.set_birthtime(Some(t)))
            }
            // Character set conversion is up to the caller, paths stay bytes.
            b"hdrcharset" | b"charset" | b"comment" => {}

            b"SCHILY.devmajor" => self.set_num(value, "devmajor", |v| {
                let rdev = entry.rdev();
                entry.set_rdev(Device::new(v as u32, rdev.minor));
            }),
            b"SCHILY.devminor" => self.set_num(value, "devminor", |v| {
                let rdev = entry.rdev();
                entry.set_rdev(Device::new(rdev.major, v as u32));
            }),
            b"SCHILY.dev" => self.set_num(value, "dev", |v| entry.set_dev(Some(Device::from_raw(v)))),
            b"SCHILY.ino" => self.set_num(value, "ino", |v| entry.set_ino(Some(v))),
            b"SCHILY.nlink" => self.set_num(value, "nlink", |v| {
                entry.set_nlink(v.try_into().unwrap_or(u32::MAX))
            }),
            b"SCHILY.fflags" => entry.set_fflags(value),
            b"SCHILY.acl.access" => self.set_acl(entry, value, AclType::ACCESS),
            b"SCHILY.acl.default" => self.set_acl(entry, value, AclType::DEFAULT),
            b"SCHILY.realsize" | b"GNU.sparse.realsize" | b"GNU.sparse.size" => {
                match parse_decimal(value) {
                    Some(size) => self.realsize = Some(size),
                    None => self.warn(format!("invalid sparse size {:?}", value.as_bstr())),
                }
            }

            b"GNU.sparse.major" => self.sparse_major = parse_decimal(value),
            b"GNU.sparse.minor" => self.sparse_minor = parse_decimal(value),
            b"GNU.sparse.name" => self.sparse_name = Some(value.into()),
            b"GNU.sparse.numblocks" => {}
            b"GNU.sparse.offset" => {
                self.sparse_major.get_or_insert(0);
                self.sparse_offset = parse_decimal(value);
            }
            b"GNU.sparse.numbytes" => match (self.sparse_offset.take(), parse_decimal(value)) {
                (Some(offset), Some(len)) => self.sparse_map.push((offset, len)),
                _ => self.warn("invalid GNU.sparse.numbytes".into()),
            },
            b"GNU.sparse.map" => {
                self.sparse_major.get_or_insert(0);
                self.sparse_minor.get_or_insert(1);
                let nums = value
                    .split_str(",")
                    .map(parse_decimal)
                    .collect::<Option<Vec<_>>>();
                match nums {
                    Some(nums) if nums.len() % 2 == 0 => {
                        self.sparse_map
                            .extend(nums.chunks_exact(2).map(|c| (c[0], c[1])));
                    }
                    _ => self.warn("invalid GNU.sparse.map".into()),
                }
            }

            _ => {
                if let Some(name) = key.strip_prefix(b"SCHILY.xattr.") {
                    entry.add_xattr(name, value);
                } else if let Some(name) = key.strip_prefix(b"LIBARCHIVE.xattr.") {
                    match (url_decode(name), base64_decode(value)) {
                        (Some(name), Some(value)) => entry.add_xattr(name, value),
                        _ => self.warn(format!("invalid xattr {:?}", name.as_bstr())),
                    }
                }
            }
        }
    }

    fn set_num(&mut self, value: &[u8], what: &str, f: impl FnOnce(u64)) {
        match parse_decimal(value) {
            Some(v) => f(v),
            None => self.warn(format!("invalid pax {what} {:?}", value.as_bstr())),
        }
    }

    fn set_time(&mut self, value: &[u8], what: &str, f: impl FnOnce(Timestamp)) {
        match parse_time(value) {
            Some(t) => f(t),
            None => self.warn(format!("invalid pax {what} {:?}", value.as_bstr())),
        }
    }

    fn set_acl(&mut self, entry: &mut Entry, text: &[u8], ty: AclType) {
        if !entry.acl_parse_text(text, ty) {
            self.warn(format!("invalid ACL {:?}", text.as_bstr()));
        }
    }
}

pub(super) fn parse_decimal(s: &[u8]) -> Option<u64> {
    if s.is_empty() || !s.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // Saturate like the binary fields do.
    Some(s.iter().fold(0u64, |acc, &d| {
        acc.saturating_mul(10).saturating_add(u64::from(d - b'0'))
    }))
}

/// Parse `[-]seconds[.fraction]`. Digits past nanosecond precision are dropped.
pub(super) fn parse_time(s: &[u8]) -> Option<Timestamp> {
    let (neg, s) = match s.strip_prefix(b"-") {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int, frac) = match s.find_byte(b'.') {
        Some(dot) => (&s[..dot], &s[dot + 1..]),
        None => (s, &b""[..]),
    };
    let sec = i64::try_from(parse_decimal(int)?).unwrap_or(i64::MAX);
    if !frac.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut nsec = 0u32;
    for i in 0..9 {
        nsec = nsec * 10 + frac.get(i).map_or(0, |&d| u32::from(d - b'0'));
    }
    Some(if !neg {
        Timestamp::new(sec, nsec)
    } else if nsec == 0 {
        Timestamp::new(-sec, 0)
    } else {
        Timestamp::new(-sec - 1, 1_000_000_000 - nsec)
    })
}

fn url_decode(s: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        if s[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(s[i]);
            i += 1;
        }
    }
    Some(out)
}

const BASE64_INVALID: u8 = 0xFF;

static BASE64_TABLE: [u8; 256] = {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut table = [BASE64_INVALID; 256];
    let mut i = 0;
    while i < 64 {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Decode base64, with or without `=` padding.
fn base64_decode(s: &[u8]) -> Option<Vec<u8>> {
    let s = s.trim_end_with(|c| c == '=');
    let mut out = Vec::with_capacity(s.len() * 3 / 4);
    let (mut acc, mut bits) = (0u32, 0u32);
    for &c in s {
        let v = BASE64_TABLE[usize::from(c)];
        if v == BASE64_INVALID {
            return None;
        }
        acc = (acc << 6) | u32::from(v);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records() {
        let body = b"30 mtime=1749300125.123456789\n12 path=abc\n\0\0\0";
        let recs = parse_records(body).unwrap();
        assert_eq!(
            recs,
            [
                (&b"mtime"[..], &b"1749300125.123456789"[..]),
                (b"path", b"abc"),
            ]
        );

        // Values may contain newlines and `=`.
        let body = b"11 k=a\nb=c\n";
        assert_eq!(parse_records(body).unwrap(), [(&b"k"[..], &b"a\nb=c"[..])]);

        assert!(parse_records(b"99 path=abc\n").is_err());
        assert!(parse_records(b"11 path=abc").is_err());
        assert!(parse_records(b"x path=abc\n").is_err());
        assert!(parse_records(b"8 =abcd\n").is_err());
    }

    #[test]
    fn times() {
        assert_eq!(parse_time(b"12"), Some(Timestamp::new(12, 0)));
        assert_eq!(parse_time(b"12.5"), Some(Timestamp::new(12, 500_000_000)));
        assert_eq!(
            parse_time(b"1.1234567891"),
            Some(Timestamp::new(1, 123_456_789))
        );
        assert_eq!(parse_time(b"-1.25"), Some(Timestamp::new(-2, 750_000_000)));
        assert_eq!(parse_time(b"-3"), Some(Timestamp::new(-3, 0)));
        assert_eq!(parse_time(b"1.x"), None);
        assert_eq!(parse_time(b""), None);
    }

    #[test]
    fn base64_and_url() {
        assert_eq!(base64_decode(b"aGVsbG8=").unwrap(), b"hello");
        assert_eq!(base64_decode(b"aGVsbG8").unwrap(), b"hello");
        assert_eq!(base64_decode(b"AAEC").unwrap(), [0, 1, 2]);
        assert!(base64_decode(b"a*b").is_none());
        assert_eq!(url_decode(b"user.a%3Db").unwrap(), b"user.a=b");
        assert!(url_decode(b"bad%4").is_none());
    }

    #[test]
    fn attributes() {
        let mut entry = Entry::new();
        let mut ext = PaxExt::default();
        for (k, v) in [
            (&b"path"[..], &b"long/name"[..]),
            (b"uid", b"70000"),
            (b"SCHILY.devmajor", b"8"),
            (b"SCHILY.devminor", b"17"),
            (b"SCHILY.xattr.user.mime", b"text/plain"),
            (b"LIBARCHIVE.xattr.user.k%3D", b"AAE="),
            (b"GNU.sparse.map", b"0,10,100,5"),
            (b"GNU.sparse.realsize", b"105"),
            (b"mtime", b"bogus"),
            (b"unknown.key", b"ignored"),
        ] {
            ext.apply(&mut entry, k, v);
        }
        assert_eq!(entry.pathname(), "long/name");
        assert_eq!(entry.uid(), 70000);
        assert_eq!(entry.rdev(), Device::new(8, 17));
        let xattrs = entry.xattrs().collect::<Vec<_>>();
        assert_eq!(xattrs[0], ("user.mime".into(), &b"text/plain"[..]));
        assert_eq!(xattrs[1], ("user.k=".into(), &[0u8, 1][..]));
        assert_eq!(ext.sparse_map, [(0, 10), (100, 5)]);
        assert_eq!(ext.realsize, Some(105));
        assert!(ext.warning.as_deref().unwrap().contains("mtime"));
    }

    #[test]
    fn sparse_versions() {
        let mut entry = Entry::new();
        let mut ext = PaxExt::default();
        ext.apply(&mut entry, b"GNU.sparse.map", b"0,10");
        assert!(!ext.sparse_map_in_body());

        let mut ext = PaxExt::default();
        ext.apply(&mut entry, b"GNU.sparse.major", b"1");
        ext.apply(&mut entry, b"GNU.sparse.minor", b"0");
        assert!(ext.sparse_map_in_body());

        // Empty values leave the attribute unset.
        let mut ext = PaxExt::default();
        ext.apply(&mut entry, b"GNU.sparse.major", b"");
        assert_eq!(ext.sparse_major, None);
    }
}
