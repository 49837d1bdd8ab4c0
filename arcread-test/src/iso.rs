//! Plain ISO 9660 images, without Rock Ridge or Joliet.
use std::collections::{BTreeMap, BTreeSet};

pub const SECTOR: usize = 2048;
const FIRST_DIRECTORY: u32 = 18;
const FLAG_DIRECTORY: u8 = 2;
/// 2024-03-15 12:34:56 UTC.
const DATE: [u8; 7] = [124, 3, 15, 12, 34, 56, 0];

fn both16(v: u16) -> [u8; 4] {
    let (le, be) = (v.to_le_bytes(), v.to_be_bytes());
    [le[0], le[1], be[0], be[1]]
}

fn both32(v: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&v.to_le_bytes());
    out[4..].copy_from_slice(&v.to_be_bytes());
    out
}

fn record(ident: &[u8], sector: u32, size: u32, flags: u8) -> Vec<u8> {
    let mut r = vec![0u8; 2];
    r.extend_from_slice(&both32(sector));
    r.extend_from_slice(&both32(size));
    r.extend_from_slice(&DATE);
    r.push(flags);
    r.extend_from_slice(&[0, 0]);
    r.extend_from_slice(&both16(1));
    r.push(ident.len() as u8);
    r.extend_from_slice(ident);
    if r.len() % 2 == 1 {
        r.push(0);
    }
    r[0] = r.len() as u8;
    r
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Collects files and directories, then lays out an image with every
/// directory in a single sector, followed by the file extents.
#[derive(Debug, Default)]
pub struct Builder {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory and its ancestors. Names should be d-characters.
    pub fn dir(&mut self, path: &str) -> &mut Self {
        let mut p = path;
        while !p.is_empty() {
            self.dirs.insert(p.to_owned());
            p = parent_of(p);
        }
        self
    }

    pub fn file(&mut self, path: &str, data: &[u8]) -> &mut Self {
        self.dir(parent_of(path));
        self.files.insert(path.to_owned(), data.to_vec());
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        // The root sorts first.
        let dirs: Vec<&str> = std::iter::once("")
            .chain(self.dirs.iter().map(|d| &d[..]))
            .collect();
        let dir_sector = |path: &str| {
            let i = dirs.iter().position(|d| *d == path).expect("known directory");
            FIRST_DIRECTORY + i as u32
        };

        let mut next = FIRST_DIRECTORY + dirs.len() as u32;
        let mut file_sector = BTreeMap::new();
        for (path, data) in &self.files {
            if data.is_empty() {
                file_sector.insert(&path[..], 0);
            } else {
                file_sector.insert(&path[..], next);
                next += data.len().div_ceil(SECTOR) as u32;
            }
        }

        let mut img = vec![0u8; next as usize * SECTOR];
        for &dir in &dirs {
            let own = dir_sector(dir);
            let mut extent = record(b"\0", own, SECTOR as u32, FLAG_DIRECTORY);
            let parent = dir_sector(parent_of(dir));
            extent.extend(record(b"\x01", parent, SECTOR as u32, FLAG_DIRECTORY));
            for &child in dirs.iter().filter(|d| !d.is_empty() && parent_of(d) == dir) {
                let ident = base_name(child).as_bytes();
                extent.extend(record(ident, dir_sector(child), SECTOR as u32, FLAG_DIRECTORY));
            }
            for (path, data) in self.files.iter().filter(|(p, _)| parent_of(p) == dir) {
                let ident = format!("{};1", base_name(path));
                let sector = file_sector[&path[..]];
                extent.extend(record(ident.as_bytes(), sector, data.len() as u32, 0));
            }
            assert!(extent.len() <= SECTOR, "directory {dir:?} does not fit a sector");
            let at = own as usize * SECTOR;
            img[at..at + extent.len()].copy_from_slice(&extent);
        }
        for (path, data) in &self.files {
            let at = file_sector[&path[..]] as usize * SECTOR;
            if !data.is_empty() {
                img[at..at + data.len()].copy_from_slice(data);
            }
        }

        let pvd = &mut img[16 * SECTOR..17 * SECTOR];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        pvd[80..88].copy_from_slice(&both32(next));
        pvd[128..132].copy_from_slice(&both16(SECTOR as u16));
        let root = record(b"\0", FIRST_DIRECTORY, SECTOR as u32, FLAG_DIRECTORY);
        pvd[156..190].copy_from_slice(&root);
        pvd[881] = 1;
        let term = &mut img[17 * SECTOR..18 * SECTOR];
        term[0] = 255;
        term[1..6].copy_from_slice(b"CD001");
        term[6] = 1;
        img
    }
}
