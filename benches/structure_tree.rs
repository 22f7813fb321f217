//! Structural tree benchmark suite.
//!
//! Benchmarks filing frames into the tree at different scales:
//! - Host counts: 1, 10, 100
//! - Frames per host: 100, 1000
//!
//! Run with: cargo bench --bench structure_tree
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use ws_intercept::{
    ChannelId, Direction, FolderKind, MessageId, MessageRecord, NodeType, Opcode, StructuralTree,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const HOST_COUNTS: &[usize] = &[1, 10, 100];
const FRAMES_PER_HOST: &[usize] = &[100, 1000];

// ============================================================================
// Benchmark: Frame Insertion
// ============================================================================

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(20);

    for &hosts in HOST_COUNTS {
        for &frames in FRAMES_PER_HOST {
            let id = format!("{hosts}h_{frames}f");
            group.bench_with_input(
                BenchmarkId::new("frames", &id),
                &(hosts, frames),
                |b, &(hosts, frames)| {
                    b.iter(|| black_box(populate(hosts, frames)));
                },
            );
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Removal With Renumbering
// ============================================================================

fn bench_remove_first_host(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove_first_host");
    group.sample_size(20);

    for &hosts in HOST_COUNTS {
        let tree = populate(hosts, 100);
        group.bench_with_input(BenchmarkId::new("hosts", hosts), &tree, |b, tree| {
            b.iter_batched(
                || tree.clone(),
                |mut tree| {
                    let root = tree.root();
                    black_box(tree.remove_child_at(root, 0))
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Typed Search
// ============================================================================

fn bench_search(c: &mut Criterion) {
    let tree = populate(100, 100);

    c.bench_function("top_down_last_host", |b| {
        b.iter(|| {
            let root = tree.root();
            let last = tree.child_at(root, 99).expect("100 hosts");
            black_box(tree.first_type_top_down(last, NodeType::Message))
        });
    });
}

// ============================================================================
// Helper Functions
// ============================================================================

fn populate(hosts: usize, frames: usize) -> StructuralTree {
    let mut tree = StructuralTree::new();
    let root = tree.root();

    for h in 0..hosts {
        let host = tree
            .find_or_create_folder(root, FolderKind::Host, &format!("host-{h}.test:80"))
            .expect("root exists");
        let messages = tree
            .find_or_create_folder(host, FolderKind::Messages, "Messages")
            .expect("host exists");

        for f in 0..frames {
            let record = MessageRecord::new(
                ChannelId::from_raw(h as u64),
                MessageId::new(f as u64),
                Opcode::Text,
                Direction::Incoming,
                b"payload".to_vec(),
            );
            let node = tree.create_message(record);
            tree.add_child(messages, node).expect("folder exists");
        }
    }

    tree
}

criterion_group!(benches, bench_insert, bench_remove_first_host, bench_search);
criterion_main!(benches);
