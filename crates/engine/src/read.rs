//! Read path: `get` and `exists`.
//!
//! Lookups check the memtable first (freshest data, filter-gated), then
//! every level from 0 down, each level's files newest to oldest. The first
//! match wins. A tombstone is authoritative wherever it is found: nothing
//! older can resurrect the key, so the search stops there.

use anyhow::Result;

use crate::{LsmTree, TreeState};

impl LsmTree {
    /// Looks up a key, returning its value if present and not deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if a table read fails mid-decode. A missing table
    /// file reads as "absent" rather than failing the lookup.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.shared().state.lock();
        self.get_locked(&mut state, key)
    }

    /// Returns whether a key is present (and not deleted).
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// The leveled search, for callers already holding the lock.
    pub(crate) fn get_locked(
        &self,
        state: &mut TreeState,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        // 1. The in-memory buffer, gated by its filter. An entry here is
        //    the most recent version, tombstone or not.
        if state.filter.test(key) {
            if let Some(entry) = state.memtable.get(key) {
                return Ok(if entry.deleted {
                    None
                } else {
                    Some(entry.value.clone())
                });
            }
        }

        // 2. The levels, newest data first: level 0 before deeper levels,
        //    and within each level the newest file first.
        let base = &self.shared().path;
        for (n, level) in state.levels.iter_mut().enumerate() {
            let dir = sstable::path_for_level(base, n);
            for file in level.files.iter_mut().rev() {
                if let Some(entry) = file.get(&dir, key)? {
                    return Ok(if entry.deleted {
                        None
                    } else {
                        Some(entry.value)
                    });
                }
            }
        }

        Ok(None)
    }
}
