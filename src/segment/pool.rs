//! Bounded-LRU pool of open segment-file handles (component A).
//!
//! Keeps at most `max_open` OS file handles open at once, re-opening a
//! segment on demand (by basename + the naming scheme's derived
//! extension) when it isn't currently resident. Used by both the read
//! path (against a discovered, immutable chain) and the write path
//! (against a chain grown one segment at a time).

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{EwfError, EwfResult};
use crate::segment::naming::{self, NamingScheme};

/// Default bound on simultaneously open OS file handles (spec §4.A).
pub const DEFAULT_MAX_OPEN_HANDLES: usize = 32;

pub struct SegmentPool {
    basename: PathBuf,
    scheme: NamingScheme,
    /// Known segment paths, 1-based segment number → path. Populated by
    /// discovery on read, grown one entry at a time on write.
    paths: HashMap<u64, PathBuf>,
    open: HashMap<u64, File>,
    usage: VecDeque<u64>,
    max_open: usize,
    writable: bool,
}

impl SegmentPool {
    /// Opens a pool over an existing chain, discovering every segment file
    /// that shares `path`'s basename under `scheme`.
    pub fn open_existing(path: &Path, scheme: NamingScheme) -> EwfResult<Self> {
        let files = naming::find_chain_files(path, scheme)?;
        if files.is_empty() {
            return Err(EwfError::format_invalid(
                "no segment files found for this chain",
            ));
        }
        let basename = naming::basename_of(&files[0])?;
        let mut paths = HashMap::new();
        for (i, f) in files.into_iter().enumerate() {
            paths.insert((i + 1) as u64, f);
        }
        Ok(SegmentPool {
            basename,
            scheme,
            paths,
            open: HashMap::new(),
            usage: VecDeque::new(),
            max_open: DEFAULT_MAX_OPEN_HANDLES,
            writable: false,
        })
    }

    /// Creates a pool for a brand-new write chain rooted at `basename`
    /// (no extension).
    pub fn new_for_write(basename: PathBuf, scheme: NamingScheme) -> Self {
        SegmentPool {
            basename,
            scheme,
            paths: HashMap::new(),
            open: HashMap::new(),
            usage: VecDeque::new(),
            max_open: DEFAULT_MAX_OPEN_HANDLES,
            writable: true,
        }
    }

    pub fn set_max_open(&mut self, max_open: usize) {
        self.max_open = max_open.max(1);
    }

    pub fn segment_numbers(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.paths.keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn path_of(&self, n: u64) -> EwfResult<PathBuf> {
        if let Some(p) = self.paths.get(&n) {
            return Ok(p.clone());
        }
        naming::segment_path(&self.basename, self.scheme, n)
    }

    /// Registers a freshly created segment file's path (writer rollover).
    pub fn create_segment(&mut self, n: u64) -> EwfResult<()> {
        let path = naming::segment_path(&self.basename, self.scheme, n)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(EwfError::io_write)?;
        self.paths.insert(n, path);
        self.insert_open(n, file);
        Ok(())
    }

    fn insert_open(&mut self, n: u64, file: File) {
        if self.open.len() >= self.max_open {
            self.evict_one();
        }
        self.open.insert(n, file);
        self.usage.retain(|&x| x != n);
        self.usage.push_back(n);
    }

    fn evict_one(&mut self) {
        if let Some(oldest) = self.usage.pop_front() {
            debug!("evicting segment {} file handle from pool", oldest);
            self.open.remove(&oldest);
        }
    }

    fn ensure_open(&mut self, n: u64) -> EwfResult<()> {
        if self.open.contains_key(&n) {
            self.usage.retain(|&x| x != n);
            self.usage.push_back(n);
            return Ok(());
        }
        let path = self.path_of(n)?;
        let file = if self.writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(EwfError::io_read)?
        } else {
            File::open(&path).map_err(EwfError::io_read)?
        };
        self.insert_open(n, file);
        Ok(())
    }

    pub fn size(&mut self, n: u64) -> EwfResult<u64> {
        self.ensure_open(n)?;
        let file = self.open.get(&n).expect("just ensured open");
        file.metadata().map(|m| m.len()).map_err(EwfError::io_read)
    }

    pub fn read_at(&mut self, n: u64, offset: u64, buf: &mut [u8]) -> EwfResult<()> {
        self.ensure_open(n)?;
        let file = self.open.get_mut(&n).expect("just ensured open");
        file.seek(SeekFrom::Start(offset)).map_err(EwfError::io_seek)?;
        file.read_exact(buf).map_err(EwfError::io_read)
    }

    pub fn write_at(&mut self, n: u64, offset: u64, data: &[u8]) -> EwfResult<()> {
        self.ensure_open(n)?;
        let file = self.open.get_mut(&n).expect("just ensured open");
        file.seek(SeekFrom::Start(offset)).map_err(EwfError::io_seek)?;
        file.write_all(data).map_err(EwfError::io_write)
    }

    /// Appends `data` to the current end of segment `n`, returning the
    /// offset it was written at.
    pub fn append(&mut self, n: u64, data: &[u8]) -> EwfResult<u64> {
        let offset = self.size(n)?;
        self.write_at(n, offset, data)?;
        Ok(offset)
    }

    pub fn flush(&mut self, n: u64) -> EwfResult<()> {
        if let Some(file) = self.open.get_mut(&n) {
            file.flush().map_err(EwfError::io_write)?;
        }
        Ok(())
    }

    pub fn close(&mut self, n: u64) {
        self.open.remove(&n);
        self.usage.retain(|&x| x != n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_back_through_pool() {
        let dir = tempdir().unwrap();
        let basename = dir.path().join("image");
        let mut pool = SegmentPool::new_for_write(basename, NamingScheme::Standard);
        pool.create_segment(1).unwrap();
        pool.write_at(1, 0, b"hello").unwrap();

        let mut buf = [0u8; 5];
        pool.read_at(1, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn append_tracks_growing_offset() {
        let dir = tempdir().unwrap();
        let basename = dir.path().join("image");
        let mut pool = SegmentPool::new_for_write(basename, NamingScheme::Standard);
        pool.create_segment(1).unwrap();
        let off1 = pool.append(1, b"abc").unwrap();
        let off2 = pool.append(1, b"de").unwrap();
        assert_eq!(off1, 0);
        assert_eq!(off2, 3);
        assert_eq!(pool.size(1).unwrap(), 5);
    }

    #[test]
    fn lru_eviction_reopens_transparently() {
        let dir = tempdir().unwrap();
        let basename = dir.path().join("image");
        let mut pool = SegmentPool::new_for_write(basename, NamingScheme::Standard);
        pool.set_max_open(1);
        pool.create_segment(1).unwrap();
        pool.write_at(1, 0, b"one").unwrap();
        pool.create_segment(2).unwrap();
        pool.write_at(2, 0, b"two").unwrap();

        // Segment 1's handle was evicted when segment 2 opened; reading it
        // again must transparently reopen the file.
        let mut buf = [0u8; 3];
        pool.read_at(1, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"one");
    }
}
