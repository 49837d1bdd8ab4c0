//! mtree specifications: a text description of a file hierarchy.
//!
//! Each line names a path followed by `keyword=value` pairs. `/set` and
//! `/unset` lines change the defaults applied to the lines after them. Paths
//! without a slash are relative to the current directory, which a `type=dir`
//! line enters and a `..` line leaves. Lines naming the same path are merged.
//!
//! Entries only carry metadata, reading file contents from disk is left to
//! the caller.
use std::collections::{HashMap, VecDeque};

use bstr::{BString, ByteSlice};

use super::{Block, Format, FormatCode, Reader};
use crate::{
    Entry, Error, Result, Status,
    entry::{Device, FileType, Timestamp},
    link_resolver::LinkResolver,
};

const SIGNATURE: &[u8] = b"#mtree";

type Keywords = Vec<(BString, BString)>;

/// Decode the escapes of a name: `\ooo` octal bytes and C-style letters.
fn unescape(s: &[u8]) -> BString {
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        let b = s[i];
        i += 1;
        if b != b'\\' || i == s.len() {
            out.push(b);
            continue;
        }
        let octal = s[i..].iter().take(3).take_while(|c| matches!(c, b'0'..=b'7'));
        if octal.clone().count() == 3 {
            out.push(octal.fold(0u8, |acc, &c| acc.wrapping_mul(8) + (c - b'0')));
            i += 3;
            continue;
        }
        out.push(match s[i] {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0C,
            b'n' => b'\n',
            b'r' => b'\r',
            b's' => b' ',
            b't' => b'\t',
            b'v' => 0x0B,
            c => c,
        });
        i += 1;
    }
    out.into()
}

fn set_keyword(keywords: &mut Keywords, key: &[u8], value: &[u8]) {
    match keywords.iter_mut().find(|(k, _)| k == key) {
        Some((_, v)) => *v = value.into(),
        None => keywords.push((key.into(), value.into())),
    }
}

fn get_keyword<'k>(keywords: &'k Keywords, key: &str) -> Option<&'k BString> {
    keywords.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn split_keyword(word: &[u8]) -> (&[u8], &[u8]) {
    match word.find_byte(b'=') {
        Some(i) => (&word[..i], &word[i + 1..]),
        None => (word, &[]),
    }
}

fn parse_u64(value: &[u8], radix: u32) -> Option<u64> {
    u64::from_str_radix(value.to_str().ok()?, radix).ok()
}

/// `time=SEC.NSEC`.
fn parse_time(value: &[u8]) -> Option<Timestamp> {
    let s = value.to_str().ok()?;
    let (sec, nsec) = s.split_once('.').unwrap_or((s, "0"));
    Some(Timestamp::new(sec.parse().ok()?, nsec.parse().ok()?))
}

/// `device=FORMAT,MAJOR,MINOR` or a raw number.
fn parse_device(value: &[u8]) -> Option<Device> {
    let s = value.to_str().ok()?;
    let mut parts = s.split(',');
    let first = parts.next()?;
    match (parts.next(), parts.next()) {
        (None, _) => Some(Device::from_raw(first.parse().ok()?)),
        (Some(major), Some(minor)) => {
            Some(Device::new(major.parse().ok()?, minor.parse().ok()?))
        }
        (Some(_), None) => None,
    }
}

fn file_type(value: &[u8]) -> Option<FileType> {
    Some(match value {
        b"file" => FileType::Regular,
        b"dir" => FileType::Directory,
        b"link" => FileType::Symlink,
        b"block" => FileType::BlockDevice,
        b"char" => FileType::CharDevice,
        b"fifo" => FileType::Fifo,
        b"socket" => FileType::Socket,
        _ => return None,
    })
}

#[derive(Debug)]
struct Spec {
    path: BString,
    keywords: Keywords,
}

/// Apply the keywords of `spec`, returning a message for those that could
/// not be understood.
fn apply(spec: &Spec, entry: &mut Entry) -> Option<String> {
    entry.set_pathname(&spec.path);
    entry.set_mode(FileType::Regular.to_mode_bits() | 0o644);

    let mut bad = Vec::new();
    for (key, value) in &spec.keywords {
        let ok = match key.as_slice() {
            b"type" => file_type(value).map(|ty| entry.set_file_type(Some(ty))).is_some(),
            b"mode" => parse_u64(value, 8).map(|m| entry.set_perm(m as u32)).is_some(),
            b"uid" => parse_u64(value, 10).map(|v| entry.set_uid(v)).is_some(),
            b"gid" => parse_u64(value, 10).map(|v| entry.set_gid(v)).is_some(),
            b"uname" => {
                entry.set_uname(unescape(value));
                true
            }
            b"gname" => {
                entry.set_gname(unescape(value));
                true
            }
            b"size" => parse_u64(value, 10).map(|v| entry.set_size(Some(v))).is_some(),
            b"time" => parse_time(value).map(|t| entry.set_mtime(Some(t))).is_some(),
            b"link" => {
                entry.set_symlink(unescape(value));
                true
            }
            b"nlink" => parse_u64(value, 10)
                .map(|v| entry.set_nlink(v.min(u32::MAX.into()) as u32))
                .is_some(),
            b"flags" => {
                entry.set_fflags(value);
                true
            }
            b"device" => parse_device(value).map(|d| entry.set_rdev(d)).is_some(),
            b"resdevice" => parse_device(value).map(|d| entry.set_dev(Some(d))).is_some(),
            b"inode" => parse_u64(value, 10).map(|v| entry.set_ino(Some(v))).is_some(),
            // Digests and hints describe contents, which are not read.
            b"cksum" | b"md5" | b"md5digest" | b"rmd160" | b"rmd160digest" | b"sha1"
            | b"sha1digest" | b"sha256" | b"sha256digest" | b"sha384" | b"sha384digest"
            | b"sha512" | b"sha512digest" | b"contents" | b"content" | b"ignore"
            | b"optional" | b"nochange" => true,
            _ => false,
        };
        if !ok {
            bad.push(format!("{key}={value}"));
        }
    }
    if matches!(entry.file_type(), Some(FileType::Directory | FileType::Symlink)) {
        entry.set_size(Some(0));
    }
    (!bad.is_empty()).then(|| format!("ignoring unrecognized mtree keywords: {}", bad.join(" ")))
}

#[derive(Debug, Default)]
pub struct Mtree {
    parsed: bool,
    specs: VecDeque<Spec>,
    links: Option<LinkResolver>,
}

impl Mtree {
    /// Read one logical line, joining backslash continuations. `None` at the
    /// end of input.
    fn read_line(r: &mut Reader<'_>, limit: u64) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            let mut want = 1;
            let (len, nl) = loop {
                let buf = r.read_ahead(want)?;
                if let Some(i) = buf.find_byte(b'\n') {
                    break (i, true);
                }
                if buf.len() < want {
                    break (buf.len(), false);
                }
                if (line.len() + buf.len()) as u64 > limit {
                    bail!(Error::fatal("mtree line is too long"));
                }
                want = buf.len() + 1;
            };
            if len == 0 && !nl && line.is_empty() {
                return Ok(None);
            }
            let buf = r.read_ahead(len + usize::from(nl))?;
            let mut part = &buf[..len];
            if part.last() == Some(&b'\r') {
                part = &part[..part.len() - 1];
            }
            let continued = nl && part.last() == Some(&b'\\');
            if continued {
                part = &part[..part.len() - 1];
            }
            line.extend_from_slice(part);
            r.consume(len + usize::from(nl));
            if !continued {
                return Ok(Some(line));
            }
            line.push(b' ');
        }
    }

    /// Read the whole specification into path ordered entries.
    fn parse(&mut self, r: &mut Reader<'_>) -> Result<Option<String>> {
        let limit = r.config().long_name_size_limit;
        let mut defaults = Keywords::new();
        let mut cwd: Vec<BString> = Vec::new();
        let mut index = HashMap::<BString, usize>::new();
        let mut specs: Vec<Spec> = Vec::new();
        let mut warning = None;

        while let Some(line) = Self::read_line(r, limit)? {
            let mut words = line.fields();
            let Some(first) = words.next() else { continue };
            if first.starts_with(b"#") {
                continue;
            }
            match first {
                b"/set" => {
                    for word in words {
                        let (k, v) = split_keyword(word);
                        set_keyword(&mut defaults, k, v);
                    }
                    continue;
                }
                b"/unset" => {
                    for word in words {
                        if word == b"all" {
                            defaults.clear();
                        } else {
                            defaults.retain(|(k, _)| k != word);
                        }
                    }
                    continue;
                }
                b".." => {
                    if cwd.pop().is_none() {
                        warning = Some("mtree `..` above the top directory".into());
                    }
                    continue;
                }
                _ if first.starts_with(b"/") => {
                    warning = Some(format!("unknown mtree command {:?}", first.as_bstr()));
                    continue;
                }
                _ => {}
            }

            let name = unescape(first);
            let relative = !name.contains(&b'/');
            let path: BString = if relative && !cwd.is_empty() {
                let mut p = Vec::new();
                for dir in &cwd {
                    p.extend_from_slice(dir);
                    p.push(b'/');
                }
                p.extend_from_slice(&name);
                p.into()
            } else {
                name.clone()
            };

            let mut keywords = defaults.clone();
            for word in words {
                let (k, v) = split_keyword(word);
                set_keyword(&mut keywords, k, v);
            }
            if relative && get_keyword(&keywords, "type").is_some_and(|t| t == "dir") {
                cwd.push(name);
            }

            match index.get(&path) {
                Some(&i) => {
                    for (k, v) in keywords {
                        set_keyword(&mut specs[i].keywords, &k, &v);
                    }
                }
                None => {
                    index.insert(path.clone(), specs.len());
                    specs.push(Spec { path, keywords });
                }
            }
        }
        debug!("mtree specification with {} entries", specs.len());
        self.specs = specs.into();
        Ok(warning)
    }
}

impl Format for Mtree {
    fn name(&self) -> &'static str {
        "mtree"
    }

    fn bid(&mut self, r: &mut Reader<'_>, _best_bid: u32) -> Result<u32> {
        let buf = r.read_ahead(SIGNATURE.len())?;
        Ok(if buf.starts_with(SIGNATURE) { 48 } else { 0 })
    }

    fn read_header(&mut self, r: &mut Reader<'_>, entry: &mut Entry) -> Result<Status> {
        r.set_format(FormatCode::MTREE, "mtree");
        let mut warning = None;
        if !self.parsed {
            warning = self.parse(r)?;
            self.parsed = true;
        }
        let Some(spec) = self.specs.pop_front() else {
            return Ok(Status::Eof);
        };
        if let Some(msg) = apply(&spec, entry) {
            warning = Some(msg);
        }
        let limit = r.config().hardlink_table_limit;
        self.links
            .get_or_insert_with(|| LinkResolver::new(limit))
            .resolve(entry);
        if entry.hardlink().is_some() {
            entry.set_size(Some(0));
        }
        Ok(match warning {
            Some(msg) => r.warn(msg),
            None => Status::Ok,
        })
    }

    fn read_data<'s>(&'s mut self, _r: &'s mut Reader<'_>) -> Result<Option<Block<'s>>> {
        Ok(None)
    }

    fn read_data_skip(&mut self, _r: &mut Reader<'_>) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) {
        *self = Self::default();
    }
}
