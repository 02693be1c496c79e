//! # WAL — Write-Ahead Log
//!
//! Durable, append-only record of every mutation, written **before** the
//! corresponding in-memory update. On restart the most recent log segment is
//! replayed so that no acknowledged write is lost.
//!
//! The log is split into numbered segments (`write-ahead-log-0000.wal`,
//! `write-ahead-log-0001.wal`, ...). The engine rotates to a fresh segment
//! right after each flush, so a crash after a flush never replays data that
//! is already persisted in an SST file. Segments older than the current one
//! are retired once their sequence range is covered by SST headers.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[id: u64][timestamp: i64][deleted: u8][key_len: u32][key][val_len: u32][value]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself. The CRC covers
//! the body. A truncated tail record (crash mid-write) reads as a clean EOF;
//! a CRC mismatch is reported as corruption.
//!
//! ## Durability
//!
//! An append is durable only once it reaches the storage medium. With
//! `sync = true` every append fsyncs before returning; otherwise callers
//! needing a hard guarantee must call [`WriteAheadLog::sync`] explicitly,
//! and a crash may lose the unsynced tail.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Safety cap on a single decoded record.
const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A single logged mutation.
///
/// `id` is the sequence number: strictly increasing within a segment, and
/// the sole tie-breaker when the same key appears in multiple places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Sequence number assigned at append time.
    pub id: u64,
    /// The mutated key.
    pub key: String,
    /// The payload value; empty for deletions.
    pub value: Vec<u8>,
    /// `true` if this entry is a tombstone.
    pub deleted: bool,
    /// Unix timestamp (seconds) of the append.
    pub timestamp: i64,
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation or contained an impossible field.
    #[error("corrupt record")]
    Corrupt,
}

/// Append-only, segmented write-ahead log.
///
/// Records are serialized into a reusable scratch buffer, CRC-checksummed,
/// and written to the current segment in a single `write_all` call.
pub struct WriteAheadLog {
    dir: PathBuf,
    file: File,
    segment: u32,
    /// Highest sequence id assigned so far (0 before the first append).
    last_id: u64,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WriteAheadLog {
    /// Opens the most recent log segment under `dir` (creating segment 0000
    /// if none exists) and returns the entries found in it, so the caller
    /// can replay whatever is not yet represented in an SST file.
    ///
    /// Entries in older segments are presumed flushed; only the newest
    /// segment is read.
    pub fn new<P: AsRef<Path>>(dir: P, sync: bool) -> Result<(Self, Vec<WalEntry>), WalError> {
        let dir = dir.as_ref().to_path_buf();
        let segment = latest_segment(&dir)?.unwrap_or(0);
        let path = dir.join(segment_filename(segment));

        let entries = match File::open(&path) {
            Ok(f) => read_records(BufReader::new(f))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(WalError::Io(e)),
        };
        let last_id = entries.iter().map(|e| e.id).max().unwrap_or(0);

        let file = open_segment(&path)?;
        Ok((
            Self {
                dir,
                file,
                segment,
                last_id,
                sync,
                buf: Vec::with_capacity(256),
            },
            entries,
        ))
    }

    /// Assigns the next sequence id, appends one framed record for the
    /// mutation, and returns the id.
    pub fn append(&mut self, key: &str, value: &[u8], deleted: bool) -> Result<u64, WalError> {
        let id = self.last_id + 1;
        let timestamp = unix_timestamp();

        // Reuse the internal buffer — clear but keep the allocation.
        self.buf.clear();

        // Reserve 8 bytes for the frame header (record_len + crc), filled below.
        self.buf.extend_from_slice(&[0u8; 8]);

        self.buf.write_u64::<LittleEndian>(id)?;
        self.buf.write_i64::<LittleEndian>(timestamp)?;
        self.buf.write_u8(deleted as u8)?;
        self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.write_u32::<LittleEndian>(value.len() as u32)?;
        self.buf.extend_from_slice(value);

        let body = &self.buf[8..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        // record_len = body + 4 (CRC), must fit in u32
        let record_len = (body.len() as u64) + 4;
        if record_len > (MAX_RECORD_SIZE as u64) {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL record too large",
            )));
        }

        let header = (record_len as u32).to_le_bytes();
        self.buf[0..4].copy_from_slice(&header);
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        // Single write call for the entire frame.
        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        self.last_id = id;
        Ok(id)
    }

    /// Returns the next sequence id that `append` will assign.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.last_id + 1
    }

    /// Forces all written data to the storage medium via `sync_all`.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Closes the current segment and opens the next one for writing.
    ///
    /// Called right after a flush: everything in the closed segment is now
    /// represented in an SST file, so a later replay only needs the new one.
    pub fn next(&mut self) -> Result<(), WalError> {
        self.sync()?;
        self.segment += 1;
        let path = self.dir.join(segment_filename(self.segment));
        self.file = open_segment(&path)?;
        log::debug!("rotated write-ahead log to segment {:04}", self.segment);
        Ok(())
    }

    /// Deletes every segment older than the current one.
    ///
    /// Safe once the sequence range of those segments is covered by a
    /// flushed SST header, which is the case right after `next()` on the
    /// flush path.
    pub fn retire_completed_segments(&mut self) -> Result<(), WalError> {
        for (n, name) in segment_files(&self.dir)? {
            if n < self.segment {
                fs::remove_file(self.dir.join(&name))?;
                log::debug!("retired write-ahead log segment {}", name);
            }
        }
        Ok(())
    }

    /// The 4-digit number of the segment currently being written.
    #[must_use]
    pub fn current_segment(&self) -> u32 {
        self.segment
    }
}

/// Reads every valid record from `r`.
///
/// - Clean EOF, or a truncated tail record, terminates the scan normally.
/// - A CRC mismatch or impossible length yields `WalError::Corrupt`.
fn read_records<R: Read>(mut r: R) -> Result<Vec<WalEntry>, WalError> {
    let mut entries = Vec::new();
    let mut body = Vec::with_capacity(256);

    loop {
        let record_len = match r.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(entries),
            Err(e) => return Err(WalError::Io(e)),
        };

        // record_len includes the CRC (4 bytes) but not itself.
        if record_len <= 4 || record_len > MAX_RECORD_SIZE {
            return Err(WalError::Corrupt);
        }

        let crc = match r.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(entries),
            Err(e) => return Err(WalError::Io(e)),
        };

        let body_len = (record_len - 4) as usize;
        body.clear();
        body.resize(body_len, 0);
        match r.read_exact(&mut body) {
            Ok(()) => {}
            // truncated tail — treat as EOF
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(entries),
            Err(e) => return Err(WalError::Io(e)),
        }

        let mut hasher = Crc32::new();
        hasher.update(&body);
        if hasher.finalize() != crc {
            return Err(WalError::Corrupt);
        }

        let mut br = &body[..];
        let id = br.read_u64::<LittleEndian>()?;
        let timestamp = br.read_i64::<LittleEndian>()?;
        let deleted = match br.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(WalError::Corrupt),
        };

        let key_len = br.read_u32::<LittleEndian>()? as usize;
        if key_len > body_len {
            return Err(WalError::Corrupt);
        }
        let mut key = vec![0u8; key_len];
        br.read_exact(&mut key)?;
        let key = String::from_utf8(key).map_err(|_| WalError::Corrupt)?;

        let val_len = br.read_u32::<LittleEndian>()? as usize;
        if val_len > body_len {
            return Err(WalError::Corrupt);
        }
        let mut value = vec![0u8; val_len];
        br.read_exact(&mut value)?;

        entries.push(WalEntry {
            id,
            key,
            value,
            deleted,
            timestamp,
        });
    }
}

fn open_segment(path: &Path) -> Result<File, WalError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn segment_filename(n: u32) -> String {
    format!("write-ahead-log-{:04}.wal", n)
}

fn parse_segment_filename(name: &str) -> Option<u32> {
    name.strip_prefix("write-ahead-log-")?
        .strip_suffix(".wal")?
        .parse()
        .ok()
}

/// All `(segment_number, filename)` pairs under `dir`.
fn segment_files(dir: &Path) -> Result<Vec<(u32, String)>, WalError> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(n) = parse_segment_filename(name) {
                segments.push((n, name.to_string()));
            }
        }
    }
    Ok(segments)
}

/// Highest segment number present under `dir`, if any.
fn latest_segment(dir: &Path) -> Result<Option<u32>, WalError> {
    Ok(segment_files(dir)?.into_iter().map(|(n, _)| n).max())
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
