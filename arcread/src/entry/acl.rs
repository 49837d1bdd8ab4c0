//! POSIX.1e access control lists.
//!
//! The owner, owning group and other entries of the access ACL are the same
//! thing as the permission bits and are stored only there. The iteration
//! synthesizes them back from the mode.
use bstr::{BString, ByteSlice};

use super::Entry;

/// Which list an ACL entry belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AclType(pub u32);

impl_open_enum! {
    AclType;

    /// Checked on access.
    ACCESS = 0x100,
    /// Inherited by new files in a directory.
    DEFAULT = 0x200,
}

impl AclType {
    pub const ALL: Self = Self(Self::ACCESS.0 | Self::DEFAULT.0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclTag {
    UserObj,
    User,
    GroupObj,
    Group,
    Mask,
    Other,
}

/// Permission bits of an ACL entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Perm(pub u32);

impl_open_enum! {
    Perm;

    EXECUTE = 1,
    WRITE = 2,
    READ = 4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub ty: AclType,
    pub tag: AclTag,
    /// A combination of [`Perm`] bits.
    pub perm: u32,
    /// The user or group id, for [`AclTag::User`] and [`AclTag::Group`].
    pub id: Option<u64>,
    pub name: Option<BString>,
}

impl Entry {
    /// Add or update an ACL entry. Owner, group and other access entries set
    /// the permission bits instead.
    pub fn acl_add(
        &mut self,
        ty: AclType,
        tag: AclTag,
        perm: u32,
        id: Option<u64>,
        name: Option<&[u8]>,
    ) {
        let perm = perm & 0o7;
        if ty == AclType::ACCESS {
            let shift = match tag {
                AclTag::UserObj => Some(6),
                AclTag::GroupObj => Some(3),
                AclTag::Other => Some(0),
                _ => None,
            };
            if let Some(shift) = shift {
                self.mode = (self.mode & !(0o7 << shift)) | (perm << shift);
                return;
            }
        }
        let same = |e: &&mut AclEntry| {
            e.ty == ty
                && e.tag == tag
                && e.id == id
                && (id.is_some() || e.name.as_ref().map(|n| n.as_slice()) == name)
        };
        if let Some(existing) = self.acl.iter_mut().find(same) {
            existing.perm = perm;
            return;
        }
        self.acl.push(AclEntry {
            ty,
            tag,
            perm,
            id,
            name: name.map(BString::from),
        });
    }

    pub fn acl_clear(&mut self) {
        self.acl.clear();
    }

    /// Number of entries [`Entry::acl_entries`] yields for `want`. The three
    /// entries mirroring the mode count only when there are extended access
    /// entries, so a plain mode reports no ACL at all.
    pub fn acl_count(&self, want: AclType) -> usize {
        let count = self.acl.iter().filter(|e| want.contains(e.ty)).count();
        let has_access = self.acl.iter().any(|e| e.ty == AclType::ACCESS);
        if want.contains(AclType::ACCESS) && has_access {
            count + 3
        } else {
            count
        }
    }

    /// Iterate the ACL entries of the requested types, access entries first.
    pub fn acl_entries(&self, want: AclType) -> impl Iterator<Item = AclEntry> + '_ {
        let synthesize =
            want.contains(AclType::ACCESS) && self.acl.iter().any(|e| e.ty == AclType::ACCESS);
        let base = [
            (AclTag::UserObj, 6),
            (AclTag::GroupObj, 3),
            (AclTag::Other, 0),
        ]
        .into_iter()
        .filter(move |_| synthesize)
        .map(move |(tag, shift)| AclEntry {
            ty: AclType::ACCESS,
            tag,
            perm: (self.mode >> shift) & 0o7,
            id: None,
            name: None,
        });
        let access = self
            .acl
            .iter()
            .filter(move |e| e.ty == AclType::ACCESS && want.contains(e.ty));
        let default = self
            .acl
            .iter()
            .filter(move |e| e.ty == AclType::DEFAULT && want.contains(e.ty));
        base.chain(access.chain(default).cloned())
    }

    /// Parse the textual ACL form, one entry per comma or newline separated
    /// item: `[default:]tag:qualifier:perms[:id]`. Both the long and the
    /// one-letter tags are accepted, as is the Solaris `other:perms` form.
    ///
    /// Returns `false` if any item was malformed; well-formed items are still
    /// added.
    pub fn acl_parse_text(&mut self, text: &[u8], default_type: AclType) -> bool {
        let mut ok = true;
        for item in text.split(|&b| b == b',' || b == b'\n') {
            let item = item.trim();
            if item.is_empty() || item.starts_with(b"#") {
                continue;
            }
            match parse_acl_item(item, default_type) {
                Some((ty, tag, perm, id, name)) => self.acl_add(ty, tag, perm, id, name),
                None => ok = false,
            }
        }
        ok
    }
}

type ParsedItem<'a> = (AclType, AclTag, u32, Option<u64>, Option<&'a [u8]>);

fn parse_acl_item(item: &[u8], default_type: AclType) -> Option<ParsedItem<'_>> {
    let mut fields: Vec<&[u8]> = item.split(|&b| b == b':').collect();
    let mut ty = default_type;
    if matches!(fields.first(), Some(&(b"default" | b"d"))) {
        ty = AclType::DEFAULT;
        fields.remove(0);
    }
    let (&tag, rest) = fields.split_first()?;

    let (qualifier, perms, extra_id) = match (tag, rest) {
        (b"other" | b"o" | b"mask" | b"m", [perms]) => (&b""[..], *perms, None),
        (_, [qualifier, perms]) => (*qualifier, *perms, None),
        (_, [qualifier, perms, id]) => (*qualifier, *perms, Some(*id)),
        _ => return None,
    };

    let perm = parse_perms(perms)?;
    let id = match extra_id {
        Some(id) => Some(parse_decimal(id)?),
        None => None,
    };
    let tag = match (tag, qualifier.is_empty()) {
        (b"user" | b"u", true) => AclTag::UserObj,
        (b"user" | b"u", false) => AclTag::User,
        (b"group" | b"g", true) => AclTag::GroupObj,
        (b"group" | b"g", false) => AclTag::Group,
        (b"mask" | b"m", _) => AclTag::Mask,
        (b"other" | b"o", _) => AclTag::Other,
        _ => return None,
    };

    let (id, name) = match tag {
        AclTag::User | AclTag::Group => match (id, parse_decimal(qualifier)) {
            (Some(id), _) => (Some(id), Some(qualifier)),
            // A bare number as qualifier is the id itself.
            (None, Some(num)) => (Some(num), None),
            (None, None) => (None, Some(qualifier)),
        },
        _ => (None, None),
    };
    Some((ty, tag, perm, id, name))
}

fn parse_perms(s: &[u8]) -> Option<u32> {
    // A single octal digit is also seen in the wild.
    if let [d @ b'0'..=b'7'] = s {
        return Some(u32::from(d - b'0'));
    }
    let mut perm = 0;
    for &c in s {
        perm |= match c {
            b'r' => Perm::READ.0,
            b'w' => Perm::WRITE.0,
            b'x' => Perm::EXECUTE.0,
            b'-' => 0,
            _ => return None,
        };
    }
    Some(perm)
}

fn parse_decimal(s: &[u8]) -> Option<u64> {
    if s.is_empty() || !s.iter().all(u8::is_ascii_digit) {
        return None;
    }
    s.to_str().ok()?.parse().ok()
}
