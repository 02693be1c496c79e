//! Streaming k-way merge of SST files.
//!
//! Each input file is already sorted, so the merge streams one entry per
//! file at a time through a min-heap and never holds more than one pending
//! entry per input in memory. When the same key appears in several inputs,
//! only the entry from the file with the highest recorded sequence number
//! survives. The output is a fresh set of non-overlapping files in a
//! temporary directory, ready for the caller to swap into a level.

use anyhow::{ensure, Result};
use memtable::Entry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::reader::{self, EntryReader};
use crate::writer::SstWriter;

/// One pending entry from one input file.
///
/// `seq` is the header sequence number of the entry's source file, used to
/// resolve duplicate keys: the file that represents the later write wins.
struct HeapNode {
    entry: Entry,
    seq: u64,
    source: usize,
}

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source == other.source
    }
}

impl Eq for HeapNode {}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the key comparison so the
        // smallest key surfaces first. On tie, prefer the lower source
        // index (arbitrary but deterministic).
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges the given SST data files into a new set of sorted,
/// non-overlapping files under a fresh temporary directory inside
/// `working_dir`, returning that directory.
///
/// * `records_per_sst` — output rolls to a new file pair once this many
///   records have been written to the current one.
/// * `keys_per_segment` — sparse-index cadence for the output files.
/// * `remove_deleted` — when `true`, tombstones are permanently dropped
///   instead of being carried forward. Only safe when merging into the
///   highest populated level, where no older version can exist below.
///
/// Every output file's header carries the maximum sequence number seen
/// across all inputs. Inputs are immutable and are left untouched; the
/// caller owns deleting them and renaming the returned directory into
/// place.
pub fn compact(
    inputs: &[PathBuf],
    working_dir: &Path,
    records_per_sst: usize,
    keys_per_segment: usize,
    remove_deleted: bool,
) -> Result<PathBuf> {
    ensure!(!inputs.is_empty(), "no input files to merge");
    ensure!(records_per_sst > 0, "records_per_sst must be > 0");

    // Open a streaming reader plus header for every input; track the
    // highest sequence number for the output headers.
    let mut readers: Vec<EntryReader> = Vec::with_capacity(inputs.len());
    let mut source_seqs: Vec<u64> = Vec::with_capacity(inputs.len());
    let mut seq_num = 0u64;
    for path in inputs {
        let (r, header) = reader::open(path)?;
        seq_num = seq_num.max(header.seq);
        source_seqs.push(header.seq);
        readers.push(r);
    }

    let mut heap = BinaryHeap::new();
    for source in 0..readers.len() {
        push_next(&mut heap, &mut readers, &source_seqs, source)?;
    }

    let tmp_dir = create_temp_dir(working_dir)?;
    let mut out = RollingWriter::new(
        tmp_dir.clone(),
        seq_num,
        keys_per_segment,
        records_per_sst,
    )?;

    let mut cur = heap.pop();
    if let Some(node) = &cur {
        push_next(&mut heap, &mut readers, &source_seqs, node.source)?;
    }

    while let Some(next) = heap.pop() {
        push_next(&mut heap, &mut readers, &source_seqs, next.source)?;

        let node = cur.as_mut().unwrap();
        if next.entry.key == node.entry.key {
            // Duplicate key: keep the version from the more recent file.
            if next.seq > node.seq {
                *node = next;
            }
            continue;
        }

        out.add(&node.entry, remove_deleted)?;
        cur = Some(next);
    }

    // The final pending entry has no successor to displace it.
    if let Some(node) = cur {
        out.add(&node.entry, remove_deleted)?;
    }

    let written = out.finish()?;
    log::info!(
        "merged {} files into {} records under {}",
        inputs.len(),
        written,
        tmp_dir.display()
    );
    Ok(tmp_dir)
}

/// Reads the next entry from `readers[source]` and, if one exists, pushes
/// it onto the heap tagged with that file's header sequence number.
fn push_next(
    heap: &mut BinaryHeap<HeapNode>,
    readers: &mut [EntryReader],
    source_seqs: &[u64],
    source: usize,
) -> Result<()> {
    if let Some(entry) = readers[source].next_entry()? {
        heap.push(HeapNode {
            entry,
            seq: source_seqs[source],
            source,
        });
    }
    Ok(())
}

/// Writer that splits output across multiple SST pairs, rolling to the
/// next numbered file once the current one reaches the record limit.
struct RollingWriter {
    dir: PathBuf,
    seq: u64,
    keys_per_segment: usize,
    records_per_sst: usize,
    writer: Option<SstWriter>,
    next_no: u32,
    written: usize,
}

impl RollingWriter {
    fn new(dir: PathBuf, seq: u64, keys_per_segment: usize, records_per_sst: usize) -> Result<Self> {
        let mut rolling = Self {
            dir,
            seq,
            keys_per_segment,
            records_per_sst,
            writer: None,
            next_no: 0,
            written: 0,
        };
        rolling.roll()?;
        Ok(rolling)
    }

    /// Finalizes the current file (if any) and opens the next numbered one.
    fn roll(&mut self) -> Result<()> {
        if let Some(full) = self.writer.take() {
            full.finish()?;
        }
        let path = self.dir.join(crate::table_filename(self.next_no));
        self.writer = Some(SstWriter::create(&path, self.seq, self.keys_per_segment)?);
        self.next_no += 1;
        Ok(())
    }

    fn add(&mut self, entry: &Entry, remove_deleted: bool) -> Result<()> {
        if entry.deleted && remove_deleted {
            return Ok(());
        }
        if self.writer.as_ref().map(SstWriter::count).unwrap_or(0) >= self.records_per_sst {
            self.roll()?;
        }
        if let Some(w) = self.writer.as_mut() {
            w.add(entry)?;
        }
        self.written += 1;
        Ok(())
    }

    /// Finalizes the current file and returns the total records written.
    fn finish(mut self) -> Result<usize> {
        if let Some(w) = self.writer.take() {
            w.finish()?;
        }
        Ok(self.written)
    }
}

/// Creates a uniquely-named scratch directory under `working_dir` so new
/// files never touch in-use tables while the merge runs.
fn create_temp_dir(working_dir: &Path) -> Result<PathBuf> {
    let mut n = 0u32;
    loop {
        let dir = working_dir.join(format!("merged-sst-{}", n));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
