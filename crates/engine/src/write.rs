//! Write path: `set`, `delete`, `increment`, flushing, and the append
//! worker.
//!
//! Every mutation is enqueued for the write-ahead log and applied to the
//! memtable while the engine lock is held, so log order always matches
//! memtable order. The queue's single consumer performs the durable
//! append; the flush trigger runs here on the writer's own path, as a
//! separate phase, so the worker never needs the engine lock.

use anyhow::{anyhow, ensure, Result};
use bloom::Filter;
use crossbeam_channel::Receiver;
use memtable::{Entry, MemTable};

use crate::levels::{Level, SstFileState};
use crate::{compaction, LsmTree, Shared, TreeState};

/// Work handed to the append worker.
pub(crate) enum WalMessage {
    /// Durably log one mutation.
    Append {
        key: String,
        value: Vec<u8>,
        deleted: bool,
    },
    /// Reply once every previously enqueued append has been performed.
    Barrier(crossbeam_channel::Sender<()>),
}

impl LsmTree {
    /// Inserts or overwrites a key-value pair.
    ///
    /// The mutation is enqueued for the write-ahead log and applied to the
    /// memtable. Reaching the configured buffer size flushes the memtable
    /// to a new level-0 table before returning.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.apply(key, value.to_vec(), false)
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// The tombstone shadows any older value in the tables below until
    /// compaction at the highest level removes it for good.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.apply(key, Vec::new(), true)
    }

    /// Atomically increments the 4-byte little-endian counter stored at
    /// `key` and returns the new value. An absent key reads as 0, so the
    /// first increment returns 1.
    ///
    /// The whole read-modify-write runs under the engine's exclusive lock;
    /// releasing it between the read and the write would allow lost
    /// updates under concurrent callers.
    pub fn increment(&self, key: &str) -> Result<u32> {
        ensure!(!key.is_empty(), "key must not be empty");

        let (value, flushed) = {
            let mut state = self.shared().state.lock();

            let current = match self.get_locked(&mut state, key)? {
                Some(bytes) => {
                    let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                        anyhow!("value for {:?} is not a 4-byte counter", key)
                    })?;
                    u32::from_le_bytes(bytes)
                }
                None => 0,
            };
            let value = current.wrapping_add(1);
            let encoded = value.to_le_bytes().to_vec();

            self.enqueue(WalMessage::Append {
                key: key.to_string(),
                value: encoded.clone(),
                deleted: false,
            })?;
            state.memtable.set(Entry::new(key.to_string(), encoded));
            state.filter.add(key);

            let flushed = self.flush_if_full(&mut state)?;
            (value, flushed)
        };

        if flushed {
            compaction::merge_after_flush(self.shared());
        }
        Ok(value)
    }

    /// Flushes the memtable to a new level-0 table regardless of the
    /// buffer threshold. A no-op when the memtable is empty.
    pub fn force_flush(&self) -> Result<()> {
        let flushed = {
            let mut state = self.shared().state.lock();
            if state.memtable.is_empty() {
                false
            } else {
                self.flush_locked(&mut state)?;
                true
            }
        };
        if flushed {
            compaction::merge_after_flush(self.shared());
        }
        Ok(())
    }

    /// Blocks until every append enqueued before this call has been
    /// written to the log. Pair with [`sync`](LsmTree::sync) for a hard
    /// durability point.
    pub fn wait_for_appends(&self) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.enqueue(WalMessage::Barrier(tx))?;
        rx.recv()
            .map_err(|_| anyhow!("write-ahead log worker exited"))
    }

    /// Drains the append queue and fsyncs the log. After this returns,
    /// every previously acknowledged write survives a crash.
    pub fn sync(&self) -> Result<()> {
        self.wait_for_appends()?;
        self.shared().wal.lock().sync()?;
        Ok(())
    }

    fn apply(&self, key: &str, value: Vec<u8>, deleted: bool) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");

        let flushed = {
            let mut state = self.shared().state.lock();

            self.enqueue(WalMessage::Append {
                key: key.to_string(),
                value: value.clone(),
                deleted,
            })?;

            let entry = if deleted {
                Entry::tombstone(key.to_string())
            } else {
                Entry::new(key.to_string(), value)
            };
            state.memtable.set(entry);
            state.filter.add(key);

            self.flush_if_full(&mut state)?
        };

        if flushed {
            compaction::merge_after_flush(self.shared());
        }
        Ok(())
    }

    fn flush_if_full(&self, state: &mut TreeState) -> Result<bool> {
        if state.memtable.len() >= self.shared().config.buffer_size {
            self.flush_locked(state)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes the memtable as a new level-0 table and rotates the log.
    ///
    /// # Steps
    ///
    /// 1. Drain the append queue so every buffered entry has its sequence
    ///    id assigned, then take the WAL handle for the whole flush.
    /// 2. Write the table pair with the highest assigned id as header.
    /// 3. Build the file's filter from exactly its key set and register
    ///    the new table at level 0.
    /// 4. Replace the memtable and its filter with empty instances.
    /// 5. Rotate to a fresh log segment and retire the covered ones.
    ///
    /// Holding the WAL handle across the table write means no append can
    /// land in the old segment afterwards, which is what makes retiring
    /// the old segments safe.
    pub(crate) fn flush_locked(&self, state: &mut TreeState) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }

        self.wait_for_appends()?;
        let shared = self.shared();
        let config = &shared.config;
        let mut wal_handle = shared.wal.lock();
        let header_seq = wal_handle.sequence() - 1;

        let filename = sstable::next_filename(&shared.path);
        let bin_path = shared.path.join(&filename);
        let entries = state.memtable.entries();
        sstable::writer::create(&bin_path, entries, header_seq, config.keys_per_segment)?;

        let mut filter = Filter::new(entries.len().max(1), config.bloom_bits_per_key);
        for key in entries.keys() {
            filter.add(key);
        }
        let (index, _) = sstable::reader::read_index_file(&bin_path)?;

        if state.levels.is_empty() {
            state.levels.push(Level::default());
        }
        state.levels[0]
            .files
            .push(SstFileState::new(filename.clone(), filter, index));

        let flushed = state.memtable.len();
        state.memtable = MemTable::new();
        state.filter = Filter::new(config.buffer_size.max(1), config.bloom_bits_per_key);

        wal_handle.next()?;
        wal_handle.retire_completed_segments()?;

        log::info!("flushed {} entries to {}", flushed, filename);
        Ok(())
    }
}

/// The append queue's single consumer: performs durable log writes and
/// answers barriers. Exits when the queue is closed, leaving the log
/// synced.
pub(crate) fn run_wal_worker(shared: &Shared, queue: Receiver<WalMessage>) {
    for msg in queue.iter() {
        match msg {
            WalMessage::Append {
                key,
                value,
                deleted,
            } => {
                let mut wal_handle = shared.wal.lock();
                if let Err(e) = wal_handle.append(&key, &value, deleted) {
                    log::error!("write-ahead log append failed for {:?}: {}", key, e);
                }
            }
            WalMessage::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    if let Err(e) = shared.wal.lock().sync() {
        log::error!("write-ahead log sync on shutdown failed: {}", e);
    }
}
