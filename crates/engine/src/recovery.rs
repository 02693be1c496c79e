//! Cold-start recovery: rebuilding the in-memory level state from the
//! files on disk and cleaning up the debris of interrupted writes.

use anyhow::Result;
use bloom::Filter;
use std::fs;
use std::path::Path;

use crate::levels::{Level, SstFileState};

/// Loads every level from disk, returning the levels (index 0 always
/// present) and the highest sequence number found in any table header.
/// The write-ahead log only needs to be replayed past that point.
pub(crate) fn load_levels(base: &Path, bits_per_key: usize) -> Result<(Vec<Level>, u64)> {
    let deepest = sstable::levels(base)
        .iter()
        .filter_map(|name| name.strip_prefix("level-")?.parse::<usize>().ok())
        .max()
        .unwrap_or(0);

    let mut levels = Vec::with_capacity(deepest + 1);
    let mut max_seq = 0u64;
    for n in 0..=deepest {
        let (level, seq) = load_level(&sstable::path_for_level(base, n), bits_per_key)?;
        max_seq = max_seq.max(seq);
        levels.push(level);
    }

    Ok((levels, max_seq))
}

/// Loads one level directory: for every table, the sparse index is read
/// and a fresh membership filter is built from the file's full key set.
/// Block caches start empty.
pub(crate) fn load_level(dir: &Path, bits_per_key: usize) -> Result<(Level, u64)> {
    let mut files = Vec::new();
    let mut max_seq = 0u64;

    for filename in sstable::filenames(dir) {
        let bin = dir.join(&filename);
        let (entries, header) = sstable::reader::load(&bin)?;
        max_seq = max_seq.max(header.seq);

        let mut filter = Filter::new(entries.len().max(1), bits_per_key);
        for entry in &entries {
            filter.add(&entry.key);
        }

        let (index, _) = sstable::reader::read_index_file(&bin)?;
        files.push(SstFileState::new(filename, filter, index));
    }

    log::debug!("loaded {} tables from {}", files.len(), dir.display());
    Ok((Level { files }, max_seq))
}

/// Removes `.tmp` files left behind by a crash mid-flush or mid-merge, and
/// abandoned merge scratch directories. Best effort.
pub(crate) fn cleanup_interrupted_writes(base: &Path) {
    let mut dirs = vec![base.to_path_buf()];
    for name in sstable::levels(base) {
        dirs.push(base.join(name));
    }

    for dir in dirs {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".tmp") {
                let _ = fs::remove_file(&path);
            } else if name.starts_with("merged-sst-") && path.is_dir() {
                let _ = fs::remove_dir_all(&path);
            }
        }
    }
}
