//! Benchmarks for tree-importer
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tree_importer::config::ImportConfig;
use tree_importer::import::{Importer, SharedCounters, VolumeThreadingPolicy};
use tree_importer::repository::MemoryRepository;
use tree_importer::source::{NodeRef, SyntheticNode};

fn bench_config(workers: usize) -> ImportConfig {
    ImportConfig {
        worker_count: workers,
        queue_capacity: 64,
        batch_size: 100,
        poll_interval: Duration::from_millis(1),
        warmup: Duration::ZERO,
        ..ImportConfig::default()
    }
}

fn benchmark_counter_increments(c: &mut Criterion) {
    c.bench_function("counter_slot_increment", |b| {
        let counters = SharedCounters::new();
        let slot = counters.slot("import-0-0");

        b.iter(|| {
            black_box(slot.increment());
        })
    });
}

fn benchmark_synthetic_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthetic_import_4x8");
    group.sample_size(20);

    for workers in [1, 4] {
        group.bench_function(format!("default_policy_{}_workers", workers), |b| {
            b.iter(|| {
                let source: NodeRef = Arc::new(SyntheticNode::root(4, 8).with_leaf_size(64));
                let mut importer =
                    Importer::new(bench_config(workers), source, Arc::new(MemoryRepository::new()))
                        .unwrap();
                black_box(importer.run().unwrap().documents)
            })
        });
    }

    group.bench_function("volume_policy_4_workers", |b| {
        b.iter(|| {
            let source: NodeRef = Arc::new(SyntheticNode::root(4, 8).with_leaf_size(64));
            let mut importer =
                Importer::new(bench_config(4), source, Arc::new(MemoryRepository::new()))
                    .unwrap()
                    .with_policy(VolumeThreadingPolicy::default());
            black_box(importer.run().unwrap().documents)
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_counter_increments, benchmark_synthetic_import);
criterion_main!(benches);
