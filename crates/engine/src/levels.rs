//! In-memory state for the on-disk levels.
//!
//! Each SST file on disk is represented by a handle holding its membership
//! filter, its sparse index, and a lazily-filled cache of decoded blocks
//! keyed by index slot. The file itself is immutable; only this handle
//! mutates, and only under the engine lock.

use anyhow::Result;
use bloom::Filter;
use memtable::Entry;
use sstable::{find_block, find_entry, reader, IndexEntry};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

/// One level of the tree: an ordered list of file handles, oldest first.
/// Level 0 files may have overlapping key ranges; deeper levels are merge
/// output and do not overlap.
#[derive(Default)]
pub(crate) struct Level {
    pub files: Vec<SstFileState>,
}

/// Handle for one immutable SST file.
pub(crate) struct SstFileState {
    pub filename: String,
    filter: Filter,
    index: Vec<IndexEntry>,
    /// Decoded entries per sparse-index slot, filled on first access.
    cache: HashMap<usize, Vec<Entry>>,
    /// When the cache was last touched; drives eviction.
    cached_at: Instant,
}

impl SstFileState {
    pub fn new(filename: String, filter: Filter, index: Vec<IndexEntry>) -> Self {
        Self {
            filename,
            filter,
            index,
            cache: HashMap::new(),
            cached_at: Instant::now(),
        }
    }

    /// Point lookup within this file.
    ///
    /// The filter rules out most absent keys without touching disk; the
    /// sparse index narrows the rest to a single block, which is decoded
    /// into the cache on first access. A missing data file reads as
    /// "entry absent".
    pub fn get(&mut self, dir: &Path, key: &str) -> Result<Option<Entry>> {
        if !self.filter.test(key) {
            return Ok(None);
        }

        let (start, end, slot) = match find_block(key, &self.index) {
            Some(b) => (b.start.offset, b.end.map(|e| e.offset), b.slot),
            None => return Ok(None),
        };

        if !self.cache.contains_key(&slot) {
            let path = dir.join(&self.filename);
            let entries = match reader::read_block(&path, start, end) {
                Ok(entries) => entries,
                Err(e) if is_not_found(&e) => return Ok(None),
                Err(e) => return Err(e),
            };
            self.cache.insert(slot, entries);
        }
        self.cached_at = Instant::now();

        let entries = &self.cache[&slot];
        Ok(find_entry(key, entries).cloned())
    }

    /// Clears the block cache if it has gone untouched for longer than
    /// `ttl`. Returns whether anything was evicted.
    pub fn evict_if_stale(&mut self, ttl: Duration) -> bool {
        if !self.cache.is_empty() && self.cached_at.elapsed() > ttl {
            self.cache.clear();
            return true;
        }
        false
    }

    #[cfg(test)]
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map(|io_err| io_err.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false)
    })
}
