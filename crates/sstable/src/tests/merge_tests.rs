use super::*;
use crate::{merge, reader};
use std::path::PathBuf;
use tempfile::tempdir;

fn merged_entries(out_dir: &Path) -> Vec<Entry> {
    let mut all = Vec::new();
    for name in crate::filenames(out_dir) {
        let (entries, _) = reader::load(&out_dir.join(name)).unwrap();
        all.extend(entries);
    }
    all
}

#[test]
fn disjoint_inputs_merge_sorted() {
    let dir = tempdir().unwrap();
    let a = dir.path().join(crate::table_filename(0));
    let b = dir.path().join(crate::table_filename(1));
    write_table(&a, &[("a", "1", false), ("c", "3", false)], 10, 16);
    write_table(&b, &[("b", "2", false), ("d", "4", false)], 20, 16);

    let out = merge::compact(&[a, b], dir.path(), 1024, 16, false).unwrap();

    let entries = merged_entries(&out);
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c", "d"]);

    // every output header carries the max input sequence
    for name in crate::filenames(&out) {
        assert_eq!(reader::read_header(&out.join(name)).unwrap().seq, 20);
    }
}

#[test]
fn duplicate_key_resolved_by_higher_sequence() {
    let dir = tempdir().unwrap();
    let old = dir.path().join(crate::table_filename(0));
    let new = dir.path().join(crate::table_filename(1));
    write_table(&old, &[("k", "stale", false), ("x", "1", false)], 5, 16);
    write_table(&new, &[("k", "fresh", false), ("y", "2", false)], 9, 16);

    // Input order must not matter; only the recorded sequence does.
    for inputs in [
        vec![old.clone(), new.clone()],
        vec![new.clone(), old.clone()],
    ] {
        let out = merge::compact(&inputs, dir.path(), 1024, 16, false).unwrap();
        let entries = merged_entries(&out);

        let hits: Vec<&Entry> = entries.iter().filter(|e| e.key == "k").collect();
        assert_eq!(hits.len(), 1, "exactly one entry per key");
        assert_eq!(hits[0].value, b"fresh");
    }
}

#[test]
fn output_has_unique_ascending_keys() {
    let dir = tempdir().unwrap();
    let a = dir.path().join(crate::table_filename(0));
    let b = dir.path().join(crate::table_filename(1));
    write_table(
        &a,
        &[("apple", "1", false), ("cherry", "2", false), ("mango", "3", false)],
        1,
        16,
    );
    write_table(
        &b,
        &[("apple", "x", false), ("banana", "y", false), ("mango", "z", false)],
        2,
        16,
    );

    let out = merge::compact(&[a, b], dir.path(), 1024, 16, false).unwrap();
    let entries = merged_entries(&out);
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();

    assert_eq!(keys, vec!["apple", "banana", "cherry", "mango"]);
}

#[test]
fn tombstones_dropped_when_requested() {
    let dir = tempdir().unwrap();
    let a = dir.path().join(crate::table_filename(0));
    write_table(
        &a,
        &[("dead", "", true), ("live", "v", false)],
        3,
        16,
    );

    let out = merge::compact(&[a.clone()], dir.path(), 1024, 16, true).unwrap();
    let entries = merged_entries(&out);

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "live");
}

#[test]
fn tombstones_carried_when_not_top_level() {
    let dir = tempdir().unwrap();
    let a = dir.path().join(crate::table_filename(0));
    write_table(&a, &[("dead", "", true), ("live", "v", false)], 3, 16);

    let out = merge::compact(&[a], dir.path(), 1024, 16, false).unwrap();
    let entries = merged_entries(&out);

    assert_eq!(entries.len(), 2);
    assert!(entries[0].deleted);
    assert_eq!(entries[0].key, "dead");
}

#[test]
fn newer_tombstone_shadows_older_value() {
    let dir = tempdir().unwrap();
    let old = dir.path().join(crate::table_filename(0));
    let new = dir.path().join(crate::table_filename(1));
    write_table(&old, &[("k", "v", false)], 1, 16);
    write_table(&new, &[("k", "", true)], 2, 16);

    // Carried through at a middle level...
    let out = merge::compact(&[old.clone(), new.clone()], dir.path(), 1024, 16, false).unwrap();
    let entries = merged_entries(&out);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].deleted);

    // ...and eliminated entirely at the top.
    let out = merge::compact(&[old, new], dir.path(), 1024, 16, true).unwrap();
    assert!(merged_entries(&out).is_empty());
}

#[test]
fn output_splits_at_record_limit() {
    let dir = tempdir().unwrap();
    let a = dir.path().join(crate::table_filename(0));
    let rows: Vec<(String, String)> = (0..10)
        .map(|i| (format!("key-{:02}", i), format!("val-{}", i)))
        .collect();
    let borrowed: Vec<(&str, &str, bool)> = rows
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str(), false))
        .collect();
    write_table(&a, &borrowed, 10, 4);

    let out = merge::compact(&[a], dir.path(), 4, 4, false).unwrap();
    let names = crate::filenames(&out);
    assert_eq!(names.len(), 3, "10 records at 4 per file need 3 files");

    let entries = merged_entries(&out);
    assert_eq!(entries.len(), 10);
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted, "keys ascend across output files");
}

#[test]
fn temp_dirs_are_unique_per_run() {
    let dir = tempdir().unwrap();
    let a = dir.path().join(crate::table_filename(0));
    write_table(&a, &[("k", "v", false)], 1, 16);

    let first = merge::compact(std::slice::from_ref(&a), dir.path(), 1024, 16, false).unwrap();
    let second = merge::compact(std::slice::from_ref(&a), dir.path(), 1024, 16, false).unwrap();
    assert_ne!(first, second);
}

#[test]
fn no_inputs_is_an_error() {
    let dir = tempdir().unwrap();
    let none: Vec<PathBuf> = Vec::new();
    assert!(merge::compact(&none, dir.path(), 1024, 16, false).is_err());
}
