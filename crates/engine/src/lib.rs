//! # Engine — LSM-tree key-value store
//!
//! The central orchestrator tying the [`memtable`], [`wal`], [`sstable`],
//! and [`bloom`] crates into a complete log-structured merge-tree.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────────┐
//! │                       LSM TREE                        │
//! │                                                       │
//! │ write.rs → queue append → memtable + filter insert    │
//! │               |                                       │
//! │               |  (buffer_size reached?)               │
//! │               v            yes                        │
//! │            flush() → new level-0 table, WAL rotates   │
//! │                                                       │
//! │ read.rs  → memtable → level 0 → level 1 → ...         │
//! │             (filter/index/cache gated, newest first)  │
//! │                                                       │
//! │ compaction.rs → k-way merge level n + n+1 → level n+1 │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                              |
//! |-----------------|------------------------------------------------------|
//! | `lib.rs`        | `LsmTree` struct, construction, workers, `Drop`      |
//! | `levels.rs`     | per-file filter / sparse index / block cache state   |
//! | `write.rs`      | `set`, `delete`, `increment`, flush, the WAL worker  |
//! | `read.rs`       | `get`, `exists`, the leveled search                  |
//! | `compaction.rs` | `merge`, `compact`, the background merge policy      |
//! | `recovery.rs`   | level loading, WAL replay cutoff, tmp cleanup        |
//! | `cache.rs`      | timed eviction of stale block caches                 |
//!
//! ## Concurrency
//!
//! One exclusive lock guards the memtable, its filter, and all per-level
//! file metadata. Durable WAL appends run on a dedicated worker fed by a
//! bounded queue, so slow disk writes never hold the main lock; a full
//! queue applies backpressure to writers instead. Compaction reads and
//! writes immutable files without the lock and only takes it for the final
//! metadata swap. Two timer threads drive the merge policy and cache GC.
//!
//! ## Crash Safety
//!
//! Every mutation is enqueued for the write-ahead log before it becomes
//! visible in the memtable. Tables and their indexes are written to
//! temporaries and renamed into place. The log rotates only after a flush
//! has durably produced its table, and startup replays whatever the newest
//! log segment holds beyond the newest table header.

mod cache;
mod compaction;
mod levels;
mod read;
mod recovery;
mod write;

pub use config::{Config, MergeSettings};

use crate::levels::Level;
use crate::write::WalMessage;
use anyhow::{Context, Result};
use bloom::Filter;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use memtable::MemTable;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wal::WriteAheadLog;

/// The log-structured merge-tree storage engine.
///
/// Cheap to share across threads behind a reference; every operation takes
/// `&self`. Dropping the tree drains the append queue, syncs the log, and
/// stops the background workers. The memtable is deliberately not flushed
/// on drop — the write-ahead log recovers it on the next open.
pub struct LsmTree {
    shared: Arc<Shared>,
    queue: Option<Sender<WalMessage>>,
    wal_worker: Option<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
}

/// State shared with the background workers.
pub(crate) struct Shared {
    pub path: PathBuf,
    pub config: Config,
    pub state: Mutex<TreeState>,
    pub wal: Mutex<WriteAheadLog>,
    pub merge: Mutex<MergeSettings>,
}

/// Everything guarded by the engine's exclusive lock.
pub(crate) struct TreeState {
    pub memtable: MemTable,
    pub filter: Filter,
    pub levels: Vec<Level>,
    /// Ticks to skip before the deepest level may merge again.
    pub cooldown: usize,
}

impl LsmTree {
    /// Opens (or creates) an engine rooted at `path`, performing full
    /// recovery from the tables and write-ahead log found there.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the data directory if it does not exist.
    /// 2. Remove temporaries left by interrupted flushes or merges.
    /// 3. Load every level's tables, rebuilding filters and indexes, and
    ///    note the highest sequence number persisted in a table header.
    /// 4. Open the newest write-ahead log segment and replay into the
    ///    memtable every entry with a later sequence number.
    /// 5. Start the append worker and the merge / cache-GC timers.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create data directory {}", path.display()))?;

        recovery::cleanup_interrupted_writes(&path);

        let (levels, persisted_seq) =
            recovery::load_levels(&path, config.bloom_bits_per_key)?;

        let (wal_handle, logged) = WriteAheadLog::new(&path, config.wal_sync)?;

        let mut memtable = MemTable::new();
        let mut filter = Filter::new(config.buffer_size.max(1), config.bloom_bits_per_key);
        let mut replayed = 0usize;
        for entry in logged {
            if entry.id > persisted_seq {
                filter.add(&entry.key);
                memtable.set(memtable::Entry {
                    key: entry.key,
                    value: entry.value,
                    deleted: entry.deleted,
                });
                replayed += 1;
            }
        }
        if replayed > 0 {
            log::info!("replayed {} write-ahead log entries past seq {}", replayed, persisted_seq);
        }

        let shared = Arc::new(Shared {
            path,
            config,
            state: Mutex::new(TreeState {
                memtable,
                filter,
                levels,
                cooldown: 0,
            }),
            wal: Mutex::new(wal_handle),
            merge: Mutex::new(MergeSettings::default()),
        });

        let (tx, rx) = crossbeam_channel::bounded(shared.config.queue_depth.max(1));
        let wal_worker = spawn_thread("wal-appender", {
            let shared = Arc::clone(&shared);
            move || write::run_wal_worker(&shared, rx)
        })?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let merge_timer = spawn_thread("merge-policy", {
            let shared = Arc::clone(&shared);
            let shutdown = shutdown_rx.clone();
            move || run_merge_timer(&shared, &shutdown)
        })?;
        let gc_timer = spawn_thread("cache-gc", {
            let shared = Arc::clone(&shared);
            move || run_gc_timer(&shared, &shutdown_rx)
        })?;

        Ok(Self {
            shared,
            queue: Some(tx),
            wal_worker: Some(wal_worker),
            timers: vec![merge_timer, gc_timer],
            shutdown: Some(shutdown_tx),
        })
    }

    /// Replaces the merge policy configuration.
    pub fn set_merge_settings(&self, settings: MergeSettings) {
        *self.shared.merge.lock() = settings;
    }

    /// Clears all in-memory level state and deletes every persisted table
    /// and level directory. The memtable and write-ahead log are left
    /// alone.
    pub fn reset_db(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.levels = vec![Level::default()];

        let base = &self.shared.path;
        for name in sstable::filenames(base) {
            let bin = base.join(&name);
            fs::remove_file(&bin)?;
            fs::remove_file(sstable::index_path(&bin))?;
        }
        for name in sstable::levels(base) {
            fs::remove_dir_all(base.join(name))?;
        }
        log::info!("reset: removed all tables under {}", base.display());
        Ok(())
    }

    /// Number of entries currently buffered in the memtable.
    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.shared.state.lock().memtable.len()
    }

    /// Number of levels the tree currently tracks (level 0 included).
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.shared.state.lock().levels.len()
    }

    /// Number of tables at `level`, or 0 for a level that does not exist.
    #[must_use]
    pub fn files_at_level(&self, level: usize) -> usize {
        self.shared
            .state
            .lock()
            .levels
            .get(level)
            .map(|l| l.files.len())
            .unwrap_or(0)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn enqueue(&self, msg: WalMessage) -> Result<()> {
        self.queue
            .as_ref()
            .context("engine is shutting down")?
            .send(msg)
            .map_err(|_| anyhow::anyhow!("write-ahead log worker exited"))
    }
}

impl std::fmt::Debug for LsmTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        let files: Vec<usize> = state.levels.iter().map(|l| l.files.len()).collect();
        f.debug_struct("LsmTree")
            .field("path", &self.shared.path)
            .field("buffer_size", &self.shared.config.buffer_size)
            .field("memtable_entries", &state.memtable.len())
            .field("files_per_level", &files)
            .finish()
    }
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain every pending append and
        // sync the log before exiting.
        self.queue.take();
        if let Some(worker) = self.wal_worker.take() {
            let _ = worker.join();
        }
        // Disconnecting the shutdown channel wakes both timers.
        self.shutdown.take();
        for timer in self.timers.drain(..) {
            let _ = timer.join();
        }
    }
}

fn spawn_thread<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .with_context(|| format!("failed to spawn {} thread", name))
}

/// Wakes on the configured merge interval and runs the threshold policy.
/// An interval of zero leaves the policy disabled; the setting is re-read
/// every pass so it can be changed at runtime.
fn run_merge_timer(shared: &Shared, shutdown: &Receiver<()>) {
    const IDLE_POLL: Duration = Duration::from_millis(500);
    loop {
        let interval = shared.merge.lock().interval;
        let wait = if interval.is_zero() { IDLE_POLL } else { interval };
        match shutdown.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {
                if !interval.is_zero() {
                    compaction::run_merge_policy(shared);
                }
            }
            _ => break,
        }
    }
}

/// Wakes on the cache GC interval and evicts stale block caches.
fn run_gc_timer(shared: &Shared, shutdown: &Receiver<()>) {
    loop {
        match shutdown.recv_timeout(shared.config.cache_gc_interval) {
            Err(RecvTimeoutError::Timeout) => cache::run_cache_gc(shared),
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests;
