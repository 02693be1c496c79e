use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Config, LsmTree};
use tempfile::tempdir;

const N_KEYS: usize = 5_000;
const VALUE_SIZE: usize = 64;

fn populated_tree() -> (tempfile::TempDir, LsmTree) {
    let dir = tempdir().unwrap();
    let tree = LsmTree::open(dir.path(), Config::with_buffer_size(1024)).unwrap();
    for i in 0..N_KEYS {
        tree.set(&format!("key{:05}", i), &vec![b'x'; VALUE_SIZE])
            .unwrap();
    }
    (dir, tree)
}

fn set_benchmark(c: &mut Criterion) {
    c.bench_function("engine_set_5k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let tree = LsmTree::open(dir.path(), Config::with_buffer_size(1024)).unwrap();
                (dir, tree)
            },
            |(_dir, tree)| {
                for i in 0..N_KEYS {
                    tree.set(&format!("key{:05}", i), &vec![b'x'; VALUE_SIZE])
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn get_benchmark(c: &mut Criterion) {
    c.bench_function("engine_get_5k", |b| {
        b.iter_batched(
            populated_tree,
            |(_dir, tree)| {
                for i in 0..N_KEYS {
                    let v = tree.get(&format!("key{:05}", i)).unwrap();
                    assert!(v.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn delete_benchmark(c: &mut Criterion) {
    c.bench_function("engine_delete_5k", |b| {
        b.iter_batched(
            populated_tree,
            |(_dir, tree)| {
                for i in 0..N_KEYS {
                    tree.delete(&format!("key{:05}", i)).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, set_benchmark, get_benchmark, delete_benchmark);
criterion_main!(benches);
