//! Criterion benchmarks for vecseg.
//!
//! - Embedding accumulation into chunked buffers
//! - Cross-segment top-k aggregation
//! - Linear segment search through the segment set

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use vecseg::search::context::WorkerId;
use vecseg::search::query::{SubIndexQuery, VectorQuery};
use vecseg::search::result::ResultHolder;
use vecseg::search::set::SegmentSet;
use vecseg::segment::builder::{BuildRecord, NormalSegmentBuilder};
use vecseg::segment::deletion::DeletionMap;
use vecseg::segment::embedding_buffer::{ChunkPolicy, EmbeddingBuffer, EmbeddingDataHolder};
use vecseg::segment::{NormalSegment, Segment};
use vecseg::storage::Storage;
use vecseg::storage::memory::{MemoryStorage, MemoryStorageConfig};
use vecseg::vector::config::{BufferConfig, IndexConfig};
use vecseg::vector::core::distance::DistanceMetric;
use vecseg::vector::core::doc::MatchItem;
use vecseg::vector::core::embedding::{ElementType, Embedding};
use vecseg::vector::engine::registry::EngineRegistry;

const DIMENSION: usize = 128;

/// Deterministic pseudo-random vectors.
fn generate_vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|i| {
            (0..dimension)
                .map(|j| ((i as f32 * 0.1 + j as f32 * 0.01).sin() * 0.5 + 0.5) * 2.0 - 1.0)
                .collect()
        })
        .collect()
}

fn bench_buffer_accumulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("embedding_buffer");
    let encoded: Vec<Vec<u8>> = generate_vectors(10_000, DIMENSION)
        .iter()
        .map(|v| ElementType::Float32.encode(v))
        .collect();
    let embedding_bytes = ElementType::Float32.embedding_bytes(DIMENSION);

    group.throughput(Throughput::Elements(encoded.len() as u64));
    group.bench_function("add_10k", |b| {
        b.iter(|| {
            let policy = ChunkPolicy::from_config(&BufferConfig::default(), false);
            let mut buffer = EmbeddingBuffer::new(embedding_bytes, policy);
            for (doc_id, embedding) in encoded.iter().enumerate() {
                buffer.add(embedding, doc_id as u32).unwrap();
            }
            black_box(buffer.chunk_count())
        })
    });

    group.bench_function("holder_add_10k_across_8_sub_indices", |b| {
        b.iter(|| {
            let mut holder = EmbeddingDataHolder::new(embedding_bytes, BufferConfig::default());
            for (doc_id, embedding) in encoded.iter().enumerate() {
                holder
                    .add(embedding, doc_id as u32, (doc_id % 8) as u64)
                    .unwrap();
            }
            black_box(holder.total_docs())
        })
    });

    group.bench_function("shrink_after_half_removed", |b| {
        b.iter_batched(
            || {
                let policy = ChunkPolicy::from_config(&BufferConfig::default(), false);
                let mut buffer = EmbeddingBuffer::new(embedding_bytes, policy);
                for (doc_id, embedding) in encoded.iter().enumerate() {
                    buffer.add(embedding, doc_id as u32).unwrap();
                }
                for doc_id in (0..encoded.len() as u32).step_by(2) {
                    buffer.remove(doc_id);
                }
                buffer
            },
            |mut buffer| {
                buffer.shrink();
                black_box(buffer.len())
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_topk_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_holder");
    // Eight segments returning overlapping top-100 lists.
    let items: Vec<MatchItem> = (0..8u32)
        .flat_map(|segment| {
            (0..100u32).map(move |i| {
                MatchItem::new(segment * 50 + i, ((segment * 31 + i * 17) % 997) as f32)
            })
        })
        .collect();

    group.throughput(Throughput::Elements(items.len() as u64));
    for metric in [DistanceMetric::SquaredEuclidean, DistanceMetric::InnerProduct] {
        group.bench_function(format!("top100_of_800_{}", metric.name()), |b| {
            b.iter(|| {
                let mut holder = ResultHolder::for_metric(metric);
                holder.append_all(items.iter().copied());
                black_box(holder.topk_match_items(100))
            })
        });
    }
    group.finish();
}

fn bench_segment_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_search");
    group.sample_size(20);

    let config = Arc::new(IndexConfig::builder().dimension(DIMENSION).build().unwrap());
    let registry = Arc::new(EngineRegistry::with_defaults());
    let set = SegmentSet::new(&config);
    let deletions = Arc::new(DeletionMap::new());
    let vectors = generate_vectors(4_000, DIMENSION);
    for (segment_no, chunk) in vectors.chunks(1_000).enumerate() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let mut builder =
            NormalSegmentBuilder::new(Arc::clone(&config), Arc::clone(&registry)).unwrap();
        for (doc, vector) in chunk.iter().enumerate() {
            let pk = (segment_no * 1_000 + doc) as u64;
            builder
                .build(&BuildRecord::new(pk, doc as u32, vec![1], vector.clone()))
                .unwrap();
        }
        builder.dump(Arc::clone(&storage), None).unwrap();
        let segment = NormalSegment::open(
            format!("seg_{segment_no}"),
            storage,
            &config,
            &registry,
            (segment_no * 1_000) as u32,
            Arc::clone(&deletions),
        )
        .unwrap();
        set.add_segment(Arc::new(Segment::Normal(segment)));
    }

    let query = VectorQuery::single(SubIndexQuery::new(
        1,
        vec![Embedding::F32(vectors[17].clone())],
        10,
    ));
    group.throughput(Throughput::Elements(vectors.len() as u64));
    group.bench_function("linear_4_segments_top10", |b| {
        b.iter(|| black_box(set.search(WorkerId(0), &query).unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_accumulation,
    bench_topk_aggregation,
    bench_segment_search
);
criterion_main!(benches);
