//! Engine configuration.
//!
//! Every tunable is an explicit value owned by the engine instance that
//! receives it, so two engines in one process never share knobs through
//! hidden globals.

use std::time::Duration;

/// Tuning parameters for a single engine instance, supplied at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of memtable entries that triggers a flush to a level-0 SST.
    pub buffer_size: usize,
    /// One sparse-index record is written per this many keys in an SST.
    pub keys_per_segment: usize,
    /// Maximum record count per SST file produced by a merge.
    pub records_per_sst: usize,
    /// Bits reserved per key in each membership filter.
    pub bloom_bits_per_key: usize,
    /// If `true`, every WAL append is fsynced before it is acknowledged.
    pub wal_sync: bool,
    /// Age after which an untouched SST block cache is evicted.
    pub cache_ttl: Duration,
    /// How often the cache GC wakes up to look for stale caches.
    pub cache_gc_interval: Duration,
    /// Capacity of the bounded WAL work queue. A full queue blocks writers.
    pub queue_depth: usize,
}

impl Config {
    /// A configuration with the given flush threshold and defaults for
    /// everything else.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            keys_per_segment: 16,
            records_per_sst: 1024,
            bloom_bits_per_key: 10,
            wal_sync: false,
            cache_ttl: Duration::from_secs(300),
            cache_gc_interval: Duration::from_secs(30),
            queue_depth: 1024,
        }
    }
}

/// Merge policy configuration.
///
/// The zero value disables background merging entirely: with an `interval`
/// of zero the merge job never runs, and with an `sst_file_threshold` of
/// zero no level is ever considered over threshold. Callers opt in via
/// `LsmTree::set_merge_settings`.
#[derive(Debug, Clone, Default)]
pub struct MergeSettings {
    /// When `true`, the threshold policy also runs synchronously right
    /// after each flush instead of waiting for the next timer tick.
    pub immediate: bool,
    /// Deepest level merges may create. Merging at this level compacts it
    /// in place instead of promoting into a new level below it.
    pub max_levels: usize,
    /// How often the background merge job inspects the levels. Zero
    /// disables the job.
    pub interval: Duration,
    /// A level with more than `sst_file_threshold * (level + 1)` files is
    /// merged. Zero disables the file-count policy.
    pub sst_file_threshold: usize,
    /// Byte-size trigger per level.
    // TODO: consult data_size_threshold once per-level byte sizes are
    // tracked alongside file counts.
    pub data_size_threshold: u64,
    /// Age trigger per level.
    // TODO: consult time_window once file creation times are tracked.
    pub time_window: Duration,
}
