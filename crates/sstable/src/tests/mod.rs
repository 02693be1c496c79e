use memtable::Entry;
use std::collections::BTreeMap;
use std::path::Path;

mod merge_tests;
mod reader_tests;

/// Writes a table at `bin_path` from `(key, value, deleted)` triples.
pub fn write_table(
    bin_path: &Path,
    rows: &[(&str, &str, bool)],
    seq: u64,
    keys_per_segment: usize,
) {
    let mut entries = BTreeMap::new();
    for (key, value, deleted) in rows {
        entries.insert(
            key.to_string(),
            Entry {
                key: key.to_string(),
                value: value.as_bytes().to_vec(),
                deleted: *deleted,
            },
        );
    }
    crate::writer::create(bin_path, &entries, seq, keys_per_segment).unwrap();
}

/// The reference table shape: keys `Key 000`..`Key 099` with values
/// `Test Value Key NNN`, making every encoded record exactly 34 bytes.
pub fn hundred_key_table(bin_path: &Path, keys_per_segment: usize) {
    let mut entries = BTreeMap::new();
    for i in 0..100 {
        let key = format!("Key {:03}", i);
        entries.insert(
            key.clone(),
            Entry::new(key.clone(), format!("Test Value {}", key).into_bytes()),
        );
    }
    crate::writer::create(bin_path, &entries, 100, keys_per_segment).unwrap();
}
