//! Similarity search throughput over a populated index
//!
//! Compares the ranked parallel scan against the lazy streaming scan.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use embindex::{BlockingEmbeddingIndex, Embedding, EmbeddingSearchIndex, EntityId, VectorDimension};
use std::hint::black_box;
use std::sync::Arc;
use tempfile::TempDir;

const DIMENSIONS: usize = 128;

/// Deterministic pseudo-random unit vectors (xorshift).
fn create_embeddings(count: usize) -> Vec<(EntityId, Embedding)> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    (0..count)
        .map(|i| {
            let values: Vec<f32> = (0..DIMENSIONS)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state % 2000) as f32 / 1000.0 - 1.0
                })
                .collect();
            (
                Arc::from(format!("symbol_{i}")),
                Embedding::from(values).normalized(),
            )
        })
        .collect()
}

fn populated_index(dir: &TempDir, count: usize) -> BlockingEmbeddingIndex {
    let index = BlockingEmbeddingIndex::new(
        dir.path().join("index"),
        VectorDimension::new(DIMENSIONS).unwrap(),
    );
    index.add_entries(create_embeddings(count), false).unwrap();
    index
}

fn bench_find_closest(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_closest");
    for count in [1_000usize, 10_000] {
        let dir = TempDir::new().unwrap();
        let index = populated_index(&dir, count);
        let query = create_embeddings(1).remove(0).1;

        group.bench_with_input(BenchmarkId::new("top_10", count), &count, |b, _| {
            b.iter(|| black_box(index.find_closest(black_box(&query), 10, None)));
        });
        group.bench_with_input(BenchmarkId::new("threshold_0.3", count), &count, |b, _| {
            b.iter(|| black_box(index.find_closest(black_box(&query), 100, Some(0.3))));
        });
    }
    group.finish();
}

fn bench_stream_find_close(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let index = populated_index(&dir, 10_000);
    let query = create_embeddings(1).remove(0).1;

    c.bench_function("stream_find_close_10000", |b| {
        b.iter(|| black_box(index.stream_find_close(black_box(&query), Some(0.3)).count()));
    });
}

criterion_group!(benches, bench_find_closest, bench_stream_find_close);
criterion_main!(benches);
