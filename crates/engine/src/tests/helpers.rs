use crate::{Config, LsmTree};
use tempfile::TempDir;

/// Opens a fresh engine in a temp directory with the given flush
/// threshold. The directory guard must outlive the tree.
pub fn open_tree(buffer_size: usize) -> (TempDir, LsmTree) {
    let dir = TempDir::new().unwrap();
    let tree = LsmTree::open(dir.path(), Config::with_buffer_size(buffer_size)).unwrap();
    (dir, tree)
}

/// Counts the `sorted-string-table-*.bin` files directly in a directory.
pub fn table_count(dir: &std::path::Path) -> usize {
    sstable::filenames(dir).len()
}
