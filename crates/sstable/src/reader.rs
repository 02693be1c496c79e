use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use memtable::Entry;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::format::{read_entry, read_index, IndexEntry, SstFileHeader};

/// Streaming reader over an SST data file, yielding entries in the order
/// they were written (ascending key order).
pub struct EntryReader {
    r: BufReader<File>,
}

impl EntryReader {
    /// Returns the next entry, or `None` once the file is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        Ok(read_entry(&mut self.r)?)
    }
}

/// Opens a table for streaming: the data file positioned at the first
/// entry, plus the header read from the index file. This is the merge
/// entry point — it never materializes the table in memory.
pub fn open(bin_path: &Path) -> Result<(EntryReader, SstFileHeader)> {
    let header = read_header(bin_path)?;
    let f = File::open(bin_path)?;
    Ok((
        EntryReader {
            r: BufReader::new(f),
        },
        header,
    ))
}

/// Reads an entire data file sequentially, plus its header.
pub fn load(bin_path: &Path) -> Result<(Vec<Entry>, SstFileHeader)> {
    let (mut reader, header) = open(bin_path)?;
    let mut entries = Vec::new();
    while let Some(e) = reader.next_entry()? {
        entries.push(e);
    }
    Ok((entries, header))
}

/// Reads just the sequence header from a table's index file.
pub fn read_header(bin_path: &Path) -> Result<SstFileHeader> {
    let mut f = File::open(crate::index_path(bin_path))?;
    let seq = f.read_u64::<LittleEndian>()?;
    Ok(SstFileHeader { seq })
}

/// Reads a table's complete sparse index, plus its header.
pub fn read_index_file(bin_path: &Path) -> Result<(Vec<IndexEntry>, SstFileHeader)> {
    let f = File::open(crate::index_path(bin_path))?;
    Ok(read_index(&mut BufReader::new(f))?)
}

/// Reads the data-file block starting at byte `start` and ending at `end`
/// (or end-of-file when `end` is `None`).
pub fn read_block(bin_path: &Path, start: u32, end: Option<u32>) -> Result<Vec<Entry>> {
    let mut f = File::open(bin_path)?;
    f.seek(SeekFrom::Start(start as u64))?;

    let mut entries = Vec::new();
    match end {
        Some(end) => {
            let len = end
                .checked_sub(start)
                .ok_or_else(|| anyhow::anyhow!("index offsets out of order: {} > {}", start, end))?;
            let mut buf = vec![0u8; len as usize];
            f.read_exact(&mut buf)?;
            let mut cur = &buf[..];
            while let Some(e) = read_entry(&mut cur)? {
                entries.push(e);
            }
        }
        None => {
            let mut r = BufReader::new(f);
            while let Some(e) = read_entry(&mut r)? {
                entries.push(e);
            }
        }
    }
    Ok(entries)
}

/// The block of a sparse index that may contain a key: the indexed entry at
/// or before the key, the next indexed entry bounding the block (if any),
/// and the block's slot number.
#[derive(Debug, PartialEq, Eq)]
pub struct BlockBounds<'a> {
    pub start: &'a IndexEntry,
    pub end: Option<&'a IndexEntry>,
    pub slot: usize,
}

/// Binary-searches a sorted sparse index for the block that may hold `key`.
///
/// Returns the bracketing pair such that `start.key <= key` and either
/// `key < end.key` or the block is the file's last. Returns `None` when
/// `key` precedes the first indexed key — the first indexed key is the
/// file's first key, so the key cannot be present at all.
pub fn find_block<'a>(key: &str, index: &'a [IndexEntry]) -> Option<BlockBounds<'a>> {
    if index.is_empty() || key < index[0].key.as_str() {
        return None;
    }

    let slot = match index.binary_search_by(|e| e.key.as_str().cmp(key)) {
        Ok(i) => i,
        // Err(i) is the insertion point; the containing block starts one
        // record earlier. i >= 1 because of the guard above.
        Err(i) => i - 1,
    };

    Some(BlockBounds {
        start: &index[slot],
        end: index.get(slot + 1),
        slot,
    })
}

/// Binary-searches the sorted entries of one block for an exact key.
pub fn find_entry<'a>(key: &str, entries: &'a [Entry]) -> Option<&'a Entry> {
    entries
        .binary_search_by(|e| e.key.as_str().cmp(key))
        .ok()
        .map(|i| &entries[i])
}
