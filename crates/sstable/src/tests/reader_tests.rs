use super::*;
use crate::reader::{self, find_block, find_entry};
use tempfile::tempdir;

// -------------------- Sparse index arithmetic --------------------

#[test]
fn sparse_index_has_one_record_per_segment() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, header) = reader::read_index_file(&bin).unwrap();
    assert_eq!(index.len(), 20);
    assert_eq!(header.seq, 100);
}

#[test]
fn find_block_brackets_an_indexed_key() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, _) = reader::read_index_file(&bin).unwrap();
    let block = find_block("Key 010", &index).expect("key past the first indexed key");
    assert_eq!(block.slot, 2);
    assert_eq!(block.start.offset, 340);
    assert_eq!(block.end.unwrap().offset, 510);
}

#[test]
fn find_block_brackets_a_non_indexed_key() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, _) = reader::read_index_file(&bin).unwrap();
    // "Key 013" falls between the records for "Key 010" and "Key 015".
    let block = find_block("Key 013", &index).unwrap();
    assert_eq!(block.slot, 2);
    assert_eq!(block.start.key, "Key 010");
    assert_eq!(block.end.unwrap().key, "Key 015");
}

#[test]
fn find_block_before_first_key_is_none() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, _) = reader::read_index_file(&bin).unwrap();
    assert!(find_block("Key !", &index).is_none());
    assert!(find_block("", &index).is_none());
}

#[test]
fn find_block_in_final_block_has_no_end() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, _) = reader::read_index_file(&bin).unwrap();
    let block = find_block("Key 099", &index).unwrap();
    assert_eq!(block.slot, 19);
    assert!(block.end.is_none());

    // Keys past the last table key still map to the final block.
    let block = find_block("Key zzz", &index).unwrap();
    assert_eq!(block.slot, 19);
}

#[test]
fn find_block_on_empty_index_is_none() {
    assert!(find_block("anything", &[]).is_none());
}

// -------------------- Block reads --------------------

#[test]
fn read_block_returns_exactly_one_segment() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, _) = reader::read_index_file(&bin).unwrap();
    let block = find_block("Key 012", &index).unwrap();
    let entries =
        reader::read_block(&bin, block.start.offset, block.end.map(|e| e.offset)).unwrap();

    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].key, "Key 010");
    assert_eq!(entries[4].key, "Key 014");

    let hit = find_entry("Key 012", &entries).unwrap();
    assert_eq!(hit.value, b"Test Value Key 012");
    assert!(find_entry("Key 012x", &entries).is_none());
}

#[test]
fn read_block_without_end_reads_to_eof() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    hundred_key_table(&bin, 5);

    let (index, _) = reader::read_index_file(&bin).unwrap();
    let last = index.last().unwrap();
    let entries = reader::read_block(&bin, last.offset, None).unwrap();

    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].key, "Key 095");
    assert_eq!(entries[4].key, "Key 099");
}

// -------------------- Streaming --------------------

#[test]
fn open_streams_entries_in_key_order() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    write_table(
        &bin,
        &[("c", "3", false), ("a", "1", false), ("b", "", true)],
        9,
        2,
    );

    let (mut r, header) = reader::open(&bin).unwrap();
    assert_eq!(header.seq, 9);

    let mut keys = Vec::new();
    while let Some(e) = r.next_entry().unwrap() {
        keys.push(e.key);
    }
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn read_header_reads_only_the_sequence() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    write_table(&bin, &[("k", "v", false)], 42, 16);

    assert_eq!(reader::read_header(&bin).unwrap().seq, 42);
}

#[test]
fn missing_table_is_an_error() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join(crate::table_filename(0));
    assert!(reader::load(&bin).is_err());
    assert!(reader::open(&bin).is_err());
}

// -------------------- Naming helpers --------------------

#[test]
fn filenames_are_sorted_and_filtered() {
    let dir = tempdir().unwrap();
    for n in [3u32, 0, 1] {
        let bin = dir.path().join(crate::table_filename(n));
        write_table(&bin, &[("k", "v", false)], 1, 16);
    }
    std::fs::write(dir.path().join("unrelated.bin"), b"x").unwrap();

    assert_eq!(
        crate::filenames(dir.path()),
        vec![
            "sorted-string-table-0000.bin",
            "sorted-string-table-0001.bin",
            "sorted-string-table-0003.bin"
        ]
    );
    assert_eq!(crate::next_filename(dir.path()), "sorted-string-table-0004.bin");
}

#[test]
fn next_filename_starts_at_zero() {
    let dir = tempdir().unwrap();
    assert_eq!(crate::next_filename(dir.path()), "sorted-string-table-0000.bin");
}

#[test]
fn levels_lists_level_directories_in_order() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("level-2")).unwrap();
    std::fs::create_dir(dir.path().join("level-1")).unwrap();
    std::fs::create_dir(dir.path().join("not-a-level")).unwrap();

    assert_eq!(crate::levels(dir.path()), vec!["level-1", "level-2"]);
    assert_eq!(crate::path_for_level(dir.path(), 0), dir.path());
    assert_eq!(
        crate::path_for_level(dir.path(), 2),
        dir.path().join("level-2")
    );
}
