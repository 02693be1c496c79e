use anyhow::{ensure, Context, Result};
use memtable::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{write_entry, write_index_entry, write_index_header};

/// Writes one immutable SST pair: a data file plus its sparse index file.
///
/// Entries must be added in ascending key order; the writer records an
/// index entry for every `keys_per_segment`-th key. Both files are written
/// to `.tmp` siblings and atomically renamed into place by
/// [`finish`](SstWriter::finish), so a crash mid-write leaves only
/// temporary files that recovery cleans up.
pub struct SstWriter {
    bin_path: PathBuf,
    index_path: PathBuf,
    bin: BufWriter<File>,
    index: BufWriter<File>,
    keys_per_segment: usize,
    offset: u32,
    count: usize,
}

impl SstWriter {
    /// Creates the pair of files for `bin_path` (the `.index` sibling is
    /// derived) and writes the sequence header.
    pub fn create(bin_path: &Path, seq: u64, keys_per_segment: usize) -> Result<Self> {
        ensure!(keys_per_segment > 0, "keys_per_segment must be > 0");

        let index_path = crate::index_path(bin_path);
        let bin = open_tmp(bin_path)?;
        let mut index = open_tmp(&index_path)?;
        write_index_header(&mut index, seq)?;

        Ok(Self {
            bin_path: bin_path.to_path_buf(),
            index_path,
            bin,
            index,
            keys_per_segment,
            offset: 0,
            count: 0,
        })
    }

    /// Appends one entry to the data file, indexing it if it falls on the
    /// sparse-index cadence.
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if self.count % self.keys_per_segment == 0 {
            write_index_entry(&mut self.index, &entry.key, self.offset)?;
        }
        let written = write_entry(&mut self.bin, entry)?;
        self.offset += written;
        self.count += 1;
        Ok(())
    }

    /// Number of entries written so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Flushes and fsyncs both files, then renames them into place.
    pub fn finish(self) -> Result<()> {
        let Self {
            bin_path,
            index_path,
            bin,
            index,
            ..
        } = self;
        commit(bin, &bin_path)?;
        commit(index, &index_path)?;
        Ok(())
    }
}

/// Writes the sorted entries of a flushed buffer as a new SST pair.
pub fn create(
    bin_path: &Path,
    entries: &BTreeMap<String, Entry>,
    seq: u64,
    keys_per_segment: usize,
) -> Result<()> {
    ensure!(!entries.is_empty(), "refusing to write an empty table");

    let mut writer = SstWriter::create(bin_path, seq, keys_per_segment)?;
    for entry in entries.values() {
        writer.add(entry)?;
    }
    writer.finish()
}

fn open_tmp(path: &Path) -> Result<BufWriter<File>> {
    let tmp = tmp_path(path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    Ok(BufWriter::new(file))
}

fn commit(mut w: BufWriter<File>, path: &Path) -> Result<()> {
    w.flush()?;
    w.into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()?;
    fs::rename(tmp_path(path), path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
