//! Commits N blocks of M key writes each against the testkit `MultiTree`,
//! comparing synchronous WAL writes against the async writer.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use treeline_core::config::Options;
use treeline_core::multitree::{ChangeSet, KvPair};
use treeline_core::testkit::MemMultiTreeFactory;
use treeline_runtime::Db;

const KEYS_PER_BLOCK: usize = 20;

fn block(i: usize) -> Vec<(String, ChangeSet)> {
    let pairs = (0..KEYS_PER_BLOCK)
        .map(|k| KvPair {
            key: format!("k{i}-{k}").into_bytes(),
            value: format!("v{i}-{k}").into_bytes(),
            delete: false,
        })
        .collect();
    vec![("bank".to_string(), ChangeSet { pairs })]
}

fn run_commits(async_commit_buffer: i64, n_blocks: usize) {
    let dir = tempfile::tempdir().unwrap();
    let mut options = Options::new(Arc::new(MemMultiTreeFactory));
    options.create_if_missing = true;
    options.initial_stores = vec!["bank".into()];
    options.async_commit_buffer = async_commit_buffer;
    options.snapshot_interval = (n_blocks as u64) + 1; // no rewrite mid-bench

    let mut db = Db::load(dir.path(), options).unwrap();
    for i in 0..n_blocks {
        db.apply_change_sets(block(i)).unwrap();
        db.commit().unwrap();
    }
    db.wait_async_commit().unwrap();
    db.close().unwrap();
}

fn commit_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_throughput");
    for n_blocks in [50usize, 200] {
        group.bench_with_input(BenchmarkId::new("sync_wal", n_blocks), &n_blocks, |b, &n| {
            b.iter(|| run_commits(-1, n));
        });
        group.bench_with_input(BenchmarkId::new("async_wal", n_blocks), &n_blocks, |b, &n| {
            b.iter(|| run_commits(64, n));
        });
    }
    group.finish();
}

criterion_group!(benches, commit_throughput);
criterion_main!(benches);
