//! Binary codecs for the SST data and index files.
//!
//! ## Data file (`sorted-string-table-NNNN.bin`)
//!
//! ```text
//! [key_len: u32 LE][key][val_len: u32 LE][value][deleted: u8]
//! ```
//!
//! repeated once per key in ascending key order. Strings are
//! length-prefixed, never terminated, so embedded nulls and arbitrary value
//! bytes round-trip exactly.
//!
//! ## Index file (`sorted-string-table-NNNN.index`)
//!
//! ```text
//! [seq: u64 LE]                               -- highest sequence number in the table
//! [key_len: u32 LE][key][offset: u32 LE] ...  -- one record per keys_per_segment-th key
//! ```
//!
//! `offset` is the byte position of the key's record in the sibling data
//! file, so a lookup only has to scan one bracketed block.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memtable::Entry;
use std::io::{self, Read, Write};

/// Maximum key size accepted during decode (64 KiB). Prevents OOM on corrupt files.
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size accepted during decode (10 MiB). Prevents OOM on corrupt files.
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Header of an SST index file: the highest sequence number represented in
/// the table. Used to resolve cross-file duplicates during merges and to
/// decide how much of the write-ahead log must be replayed on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SstFileHeader {
    pub seq: u64,
}

/// One sparse index record: a sampled key and the byte offset of its entry
/// in the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub offset: u32,
}

/// Writes one entry to the data file, returning the encoded byte count.
pub fn write_entry<W: Write>(w: &mut W, entry: &Entry) -> io::Result<u32> {
    w.write_u32::<LittleEndian>(entry.key.len() as u32)?;
    w.write_all(entry.key.as_bytes())?;
    w.write_u32::<LittleEndian>(entry.value.len() as u32)?;
    w.write_all(&entry.value)?;
    w.write_u8(entry.deleted as u8)?;
    Ok(4 + entry.key.len() as u32 + 4 + entry.value.len() as u32 + 1)
}

/// Reads the next entry from the data stream.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes where the next
/// record would start); an end of stream in the middle of a record is an
/// error.
pub fn read_entry<R: Read>(r: &mut R) -> io::Result<Option<Entry>> {
    let key_len = match r.read_u32::<LittleEndian>() {
        Ok(v) => v as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if key_len > MAX_KEY_BYTES {
        return Err(invalid_data(format!(
            "key length {} exceeds maximum {}",
            key_len, MAX_KEY_BYTES
        )));
    }
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let key = String::from_utf8(key).map_err(|_| invalid_data("key is not valid UTF-8"))?;

    let val_len = r.read_u32::<LittleEndian>()? as usize;
    if val_len > MAX_VALUE_BYTES {
        return Err(invalid_data(format!(
            "value length {} exceeds maximum {}",
            val_len, MAX_VALUE_BYTES
        )));
    }
    let mut value = vec![0u8; val_len];
    r.read_exact(&mut value)?;

    let deleted = match r.read_u8()? {
        0 => false,
        1 => true,
        b => return Err(invalid_data(format!("invalid deleted flag {}", b))),
    };

    Ok(Some(Entry {
        key,
        value,
        deleted,
    }))
}

/// Writes the index file header.
pub fn write_index_header<W: Write>(w: &mut W, seq: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(seq)
}

/// Writes one sparse index record.
pub fn write_index_entry<W: Write>(w: &mut W, key: &str, offset: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(key.len() as u32)?;
    w.write_all(key.as_bytes())?;
    w.write_u32::<LittleEndian>(offset)
}

/// Reads a complete index file: the sequence header followed by every
/// sparse record.
pub fn read_index<R: Read>(r: &mut R) -> io::Result<(Vec<IndexEntry>, SstFileHeader)> {
    let seq = r.read_u64::<LittleEndian>()?;
    let header = SstFileHeader { seq };

    let mut index = Vec::new();
    loop {
        let key_len = match r.read_u32::<LittleEndian>() {
            Ok(v) => v as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        if key_len > MAX_KEY_BYTES {
            return Err(invalid_data(format!(
                "index key length {} exceeds maximum {}",
                key_len, MAX_KEY_BYTES
            )));
        }
        let mut key = vec![0u8; key_len];
        r.read_exact(&mut key)?;
        let key = String::from_utf8(key).map_err(|_| invalid_data("index key is not valid UTF-8"))?;
        let offset = r.read_u32::<LittleEndian>()?;
        index.push(IndexEntry { key, offset });
    }

    Ok((index, header))
}

fn invalid_data<E>(msg: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
