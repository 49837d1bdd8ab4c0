//! Turn repeated inodes into hard links.
//!
//! Formats like cpio and mtree store every link to a file as a complete
//! member carrying the same device and inode numbers. The first member seen
//! for an inode is kept as is, later ones get it as their hard link target.
use std::collections::HashMap;

use bstr::BString;

use crate::entry::{Device, Entry};

#[derive(Debug)]
struct Link {
    name: BString,
    /// Links still expected after the ones seen so far.
    remaining: u32,
}

#[derive(Debug)]
pub struct LinkResolver {
    table: HashMap<(Device, u64), Link>,
    limit: usize,
    overflowed: bool,
}

impl LinkResolver {
    /// Remember at most `limit` inodes at once.
    pub fn new(limit: usize) -> Self {
        Self {
            table: HashMap::new(),
            limit,
            overflowed: false,
        }
    }

    /// Number of inodes waiting for more links.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Record `entry`, or point it at the first member with the same inode.
    ///
    /// Entries without an inode number or with a single link are left alone.
    /// An inode is forgotten once all of its links were seen.
    pub fn resolve(&mut self, entry: &mut Entry) {
        if entry.nlink() <= 1 || entry.is_dir() {
            return;
        }
        let Some(ino) = entry.ino() else { return };
        let key = (entry.dev().unwrap_or_default(), ino);

        if let Some(link) = self.table.get_mut(&key) {
            entry.set_hardlink(&link.name);
            link.remaining = link.remaining.saturating_sub(1);
            if link.remaining == 0 {
                self.table.remove(&key);
            }
            return;
        }

        if self.table.len() >= self.limit {
            if !self.overflowed {
                self.overflowed = true;
                warn!(
                    "hardlink table is full with {} inodes, further links are reported as separate files",
                    self.limit,
                );
            }
            return;
        }
        self.table.insert(
            key,
            Link {
                name: entry.pathname().to_owned(),
                remaining: entry.nlink() - 1,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, ino: u64, nlink: u32) -> Entry {
        let mut e = Entry::new();
        e.set_pathname(path);
        e.set_mode(0o100644);
        e.set_dev(Some(Device::new(8, 1)));
        e.set_ino(Some(ino));
        e.set_nlink(nlink);
        e
    }

    #[test]
    fn links_resolve_to_first() {
        let mut r = LinkResolver::new(16);
        let mut a = entry("a", 5, 3);
        let mut b = entry("b", 5, 3);
        let mut c = entry("c", 5, 3);
        let mut d = entry("d", 6, 1);
        r.resolve(&mut a);
        r.resolve(&mut d);
        r.resolve(&mut b);
        assert_eq!(r.len(), 1);
        r.resolve(&mut c);
        assert!(r.is_empty());

        assert_eq!(a.hardlink(), None);
        assert_eq!(b.hardlink(), Some("a".into()));
        assert_eq!(c.hardlink(), Some("a".into()));
        assert_eq!(d.hardlink(), None);
    }

    #[test]
    fn different_device_is_different_inode() {
        let mut r = LinkResolver::new(16);
        let mut a = entry("a", 5, 2);
        let mut b = entry("b", 5, 2);
        b.set_dev(Some(Device::new(8, 2)));
        r.resolve(&mut a);
        r.resolve(&mut b);
        assert_eq!(b.hardlink(), None);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn capacity_limit() {
        let mut r = LinkResolver::new(1);
        let mut a = entry("a", 1, 2);
        let mut b = entry("b", 2, 2);
        let mut a2 = entry("a2", 1, 2);
        let mut b2 = entry("b2", 2, 2);
        for e in [&mut a, &mut b, &mut a2, &mut b2] {
            r.resolve(e);
        }
        assert_eq!(a2.hardlink(), Some("a".into()));
        assert_eq!(b2.hardlink(), None);
    }
}
