//! Merge and compaction: reorganizing tables across levels.
//!
//! The expensive phase — streaming the k-way merge and writing the new
//! files — runs without the engine lock, since every input is immutable.
//! Only the final swap (deleting inputs, renaming the scratch directory
//! into place, rebuilding the affected levels' in-memory state) is locked,
//! which bounds lock hold time regardless of data volume.

use anyhow::{bail, Result};
use std::fs;

use crate::{recovery, LsmTree, Shared};

impl LsmTree {
    /// Merges every table at `level` with every table at `level + 1`,
    /// promoting the result into `level + 1`.
    ///
    /// When `level` is the configured maximum, the level is compacted in
    /// place instead — there is no deeper level to merge into. Tombstones
    /// are permanently removed when the merge target is the highest
    /// populated level, where no older version can exist below them.
    ///
    /// # Errors
    ///
    /// Returns an error when `level` exceeds the highest existing level;
    /// the tree is left untouched.
    pub fn merge(&self, level: usize) -> Result<()> {
        merge(self.shared(), level)
    }

    /// Merges the tables of a single level in place.
    ///
    /// Intended for the deepest level of the tree, so its tombstones can
    /// be dropped. Refuses level 0: its files hold overlapping key ranges,
    /// and consolidating them without level 1 would accomplish nothing.
    pub fn compact(&self, level: usize) -> Result<()> {
        compact_level(self.shared(), level)
    }
}

pub(crate) fn merge(shared: &Shared, level: usize) -> Result<()> {
    let highest = highest_level(shared);
    if level > highest {
        bail!(
            "merge cannot process level {}: the tree only has {} level(s)",
            level,
            highest + 1
        );
    }

    let max_levels = shared.merge.lock().max_levels;
    if level > 0 && level == max_levels {
        // Cannot merge past the configured bottom; consolidate it instead.
        return compact_level(shared, level);
    }

    let level_path = sstable::path_for_level(&shared.path, level);
    let next_path = sstable::path_for_level(&shared.path, level + 1);

    let mut inputs = Vec::new();
    for name in sstable::filenames(&level_path) {
        inputs.push(level_path.join(name));
    }
    for name in sstable::filenames(&next_path) {
        inputs.push(next_path.join(name));
    }
    if inputs.is_empty() {
        return Ok(());
    }

    let remove_deleted = level == highest;
    if remove_deleted {
        log::info!(
            "merging highest level {}: tombstones will be permanently removed",
            level
        );
    }

    // Heavy phase, unlocked: inputs are immutable and the output lands in
    // a scratch directory nothing else reads.
    let config = &shared.config;
    let tmp_dir = sstable::merge::compact(
        &inputs,
        &shared.path,
        config.records_per_sst,
        config.keys_per_segment,
        remove_deleted,
    )?;

    // Final swap under the lock.
    let mut state = shared.state.lock();
    for path in &inputs {
        let _ = fs::remove_file(path);
        let _ = fs::remove_file(sstable::index_path(path));
    }
    if next_path.exists() {
        fs::remove_dir_all(&next_path)?;
    }
    fs::rename(&tmp_dir, &next_path)?;

    let (reloaded, _) = recovery::load_level(&level_path, config.bloom_bits_per_key)?;
    state.levels[level] = reloaded;
    let (promoted, _) = recovery::load_level(&next_path, config.bloom_bits_per_key)?;
    if state.levels.len() <= level + 1 {
        state.levels.push(promoted);
    } else {
        state.levels[level + 1] = promoted;
    }

    log::info!("merge of level {} into level {} complete", level, level + 1);
    Ok(())
}

pub(crate) fn compact_level(shared: &Shared, level: usize) -> Result<()> {
    if level == 0 {
        bail!("cannot compact level 0: its tables hold overlapping key ranges");
    }
    let highest = highest_level(shared);
    if level > highest {
        bail!(
            "compact cannot process level {}: the tree only has {} level(s)",
            level,
            highest + 1
        );
    }

    let level_path = sstable::path_for_level(&shared.path, level);
    let inputs: Vec<_> = sstable::filenames(&level_path)
        .into_iter()
        .map(|name| level_path.join(name))
        .collect();
    if inputs.is_empty() {
        return Ok(());
    }

    let remove_deleted = level == highest;
    if remove_deleted {
        log::info!(
            "compacting highest level {}: tombstones will be permanently removed",
            level
        );
    }

    let config = &shared.config;
    let tmp_dir = sstable::merge::compact(
        &inputs,
        &shared.path,
        config.records_per_sst,
        config.keys_per_segment,
        remove_deleted,
    )?;

    let mut state = shared.state.lock();
    fs::remove_dir_all(&level_path)?;
    fs::rename(&tmp_dir, &level_path)?;

    let (reloaded, _) = recovery::load_level(&level_path, config.bloom_bits_per_key)?;
    state.levels[level] = reloaded;

    log::info!("compaction of level {} complete", level);
    Ok(())
}

/// The deepest level the tree currently has.
fn highest_level(shared: &Shared) -> usize {
    shared.state.lock().levels.len().saturating_sub(1)
}

/// One pass of the threshold policy: level 0 first, then each deeper
/// level. A level holding more than `sst_file_threshold * (level + 1)`
/// tables is merged. The deepest level is throttled by a cooldown counter
/// so a chronically full bottom level is not re-merged on every tick.
pub(crate) fn run_merge_policy(shared: &Shared) {
    let settings = shared.merge.lock().clone();
    if settings.sst_file_threshold == 0 {
        return;
    }

    let level_count = highest_level(shared) + 1;
    for level in 0..level_count {
        let dir = sstable::path_for_level(&shared.path, level);
        let files = sstable::filenames(&dir).len();
        if files <= settings.sst_file_threshold * (level + 1) {
            continue;
        }

        if level > 0 && level == level_count - 1 {
            let mut state = shared.state.lock();
            if state.cooldown > 0 {
                state.cooldown -= 1;
                log::debug!(
                    "deepest level {} over threshold, cooling down ({} ticks left)",
                    level,
                    state.cooldown
                );
                continue;
            }
            state.cooldown = settings.sst_file_threshold * (level + 1);
        }

        log::info!(
            "level {} has {} tables, over merge threshold {}",
            level,
            files,
            settings.sst_file_threshold * (level + 1)
        );
        if let Err(e) = merge(shared, level) {
            log::warn!("background merge of level {} failed: {}", level, e);
        }
    }
}

/// Runs the threshold policy inline after a flush when the merge settings
/// ask for immediate merging.
pub(crate) fn merge_after_flush(shared: &Shared) {
    if shared.merge.lock().immediate {
        run_merge_policy(shared);
    }
}
