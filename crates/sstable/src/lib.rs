//! # SST — Sorted String Tables
//!
//! Immutable on-disk storage for the engine. When the in-memory buffer
//! fills up it is flushed as one table; compaction later merges tables into
//! deeper levels. Tables are *write-once, read-many* — once created they
//! are never modified, only replaced.
//!
//! Each table is a pair of files:
//!
//! ```text
//! sorted-string-table-NNNN.bin     -- entries, sorted by key
//! sorted-string-table-NNNN.index   -- seq header + sparse (key, offset) records
//! ```
//!
//! `NNNN` is a zero-padded, monotonically increasing 4-digit number.
//! Level-0 pairs live directly in the engine's base directory; deeper
//! levels use a `level-<n>/` subdirectory with the same naming.
//!
//! The sparse index records every Nth key with its byte offset into the
//! data file, so a point lookup reads a single bracketed block instead of
//! scanning the whole file. See [`format`] for the exact byte layout,
//! [`writer`] / [`reader`] for file production and access, and [`merge`]
//! for the streaming k-way compaction primitive.

pub mod format;
pub mod merge;
pub mod reader;
pub mod writer;

pub use format::{IndexEntry, SstFileHeader};
pub use merge::compact;
pub use reader::{find_block, find_entry, BlockBounds, EntryReader};
pub use writer::SstWriter;

use std::fs;
use std::path::{Path, PathBuf};

const TABLE_PREFIX: &str = "sorted-string-table-";
const TABLE_SUFFIX: &str = ".bin";
const LEVEL_PREFIX: &str = "level-";

/// The data filename for table number `n`.
pub fn table_filename(n: u32) -> String {
    format!("{}{:04}{}", TABLE_PREFIX, n, TABLE_SUFFIX)
}

/// The index-file path that pairs with a `.bin` data path.
pub fn index_path(bin_path: &Path) -> PathBuf {
    bin_path.with_extension("index")
}

/// Parses a table number out of a data filename.
fn table_number(name: &str) -> Option<u32> {
    name.strip_prefix(TABLE_PREFIX)?
        .strip_suffix(TABLE_SUFFIX)?
        .parse()
        .ok()
}

/// Data filenames of the tables under `dir`, in ascending (oldest-first)
/// numeric order. A missing directory reads as empty.
pub fn filenames(dir: &Path) -> Vec<String> {
    let mut tables: Vec<(u32, String)> = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(n) = table_number(name) {
                    tables.push((n, name.to_string()));
                }
            }
        }
    }
    tables.sort();
    tables.into_iter().map(|(_, name)| name).collect()
}

/// The next unused table filename under `dir`.
pub fn next_filename(dir: &Path) -> String {
    let next = filenames(dir)
        .iter()
        .filter_map(|name| table_number(name))
        .max()
        .map(|n| n + 1)
        .unwrap_or(0);
    table_filename(next)
}

/// Names of the `level-<n>` subdirectories under `base`, in ascending
/// level order. These hold the consolidated, non-overlapping tables at
/// levels greater than 0.
pub fn levels(base: &Path) -> Vec<String> {
    let mut lvls: Vec<(u32, String)> = Vec::new();
    if let Ok(entries) = fs::read_dir(base) {
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(n) = name.strip_prefix(LEVEL_PREFIX).and_then(|s| s.parse().ok()) {
                    lvls.push((n, name.to_string()));
                }
            }
        }
    }
    lvls.sort();
    lvls.into_iter().map(|(_, name)| name).collect()
}

/// The directory holding level `level`'s tables: the base directory itself
/// for level 0, `base/level-<n>` otherwise.
pub fn path_for_level(base: &Path, level: usize) -> PathBuf {
    if level == 0 {
        base.to_path_buf()
    } else {
        base.join(format!("{}{}", LEVEL_PREFIX, level))
    }
}

#[cfg(test)]
mod tests;
