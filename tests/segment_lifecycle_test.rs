//! End-to-end segment scenarios: build, search, delete, realtime, merge.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use vecseg::prelude::*;
use vecseg::search::filter::ExcludeDocIds;
use vecseg::segment::data_io::SegmentDataReader;
use vecseg::segment::deletion::DeletionMap;
use vecseg::storage::file::FileStorageConfig;
use vecseg::storage::memory::{MemoryStorage, MemoryStorageConfig};
use vecseg::storage::{Storage, StorageConfig, StorageFactory};
use vecseg::vector::core::doc::DocIdRemap;

fn config() -> Arc<IndexConfig> {
    Arc::new(
        IndexConfig::builder()
            .dimension(2)
            .distance_metric(DistanceMetric::SquaredEuclidean)
            .build()
            .unwrap(),
    )
}

fn file_storage(dir: &std::path::Path) -> Arc<dyn Storage> {
    StorageFactory::create(StorageConfig::File(FileStorageConfig::new(dir))).unwrap()
}

fn point(x: f32) -> Vec<f32> {
    vec![x, 0.0]
}

fn query(sub_index_id: SubIndexId, x: f32, topk: usize) -> VectorQuery {
    VectorQuery::single(SubIndexQuery::new(
        sub_index_id,
        vec![Embedding::F32(point(x))],
        topk,
    ))
}

/// Build a segment holding pks `first..first+count` with doc-id = pk - first
/// and embedding `[pk, 0]`, all in sub-index 1.
fn build_segment(storage: Arc<dyn Storage>, registry: &Arc<EngineRegistry>, first: u64, count: u64) {
    let mut builder = NormalSegmentBuilder::new(config(), Arc::clone(registry)).unwrap();
    for pk in first..first + count {
        builder
            .build(&BuildRecord::new(pk, (pk - first) as u32, vec![1], point(pk as f32)))
            .unwrap();
    }
    builder.dump(storage, None).unwrap();
}

#[test]
fn test_file_backed_build_search_delete() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::with_defaults());
    let deletions = Arc::new(DeletionMap::new());
    let set = SegmentSet::new(&config());

    for (n, base) in [(0u64, 0u32), (1, 10)] {
        let storage = file_storage(&temp.path().join(format!("seg_{n}")));
        build_segment(Arc::clone(&storage), &registry, base as u64, 10);
        let segment = NormalSegment::open(
            format!("seg_{n}"),
            storage,
            &config(),
            &registry,
            base,
            Arc::clone(&deletions),
        )
        .unwrap();
        set.add_segment(Arc::new(Segment::Normal(segment)));
    }

    let results = set.search(WorkerId(0), &query(1, 9.6, 3)).unwrap();
    let ids: Vec<DocId> = results[0].items.iter().map(|item| item.doc_id).collect();
    assert_eq!(ids, vec![9, 10, 11]);

    deletions.delete(10);
    let results = set.search(WorkerId(0), &query(1, 9.6, 3)).unwrap();
    let ids: Vec<DocId> = results[0].items.iter().map(|item| item.doc_id).collect();
    assert_eq!(ids, vec![8, 9, 11]);

    let filtered = query(1, 9.6, 3).with_filter(Arc::new(ExcludeDocIds::new([9])));
    let results = set.search(WorkerId(0), &filtered).unwrap();
    let ids: Vec<DocId> = results[0].items.iter().map(|item| item.doc_id).collect();
    assert_eq!(ids, vec![8, 11, 12]);
}

#[test]
fn test_realtime_then_flush_to_normal() {
    let registry = Arc::new(EngineRegistry::with_defaults());
    let deletions = Arc::new(DeletionMap::new());
    let set = SegmentSet::new(&config());

    let mut realtime = RealtimeSegmentBuilder::new(config(), &registry).unwrap();
    for pk in 0..5u64 {
        realtime
            .build(&BuildRecord::new(pk, pk as u32, vec![1], point(pk as f32)))
            .unwrap();
    }
    // Upsert moves pk 0 far away.
    realtime
        .build(&BuildRecord::new(0, 5, vec![1], point(100.0)))
        .unwrap();
    assert!(realtime.delete(4).unwrap());

    set.add_segment(Arc::new(Segment::Realtime(RealtimeSegment::new(
        "rt",
        realtime.index(),
        0,
        Arc::clone(&deletions),
    ))));
    let results = set.search(WorkerId(0), &query(1, 0.0, 10)).unwrap();
    let ids: Vec<DocId> = results[0].items.iter().map(|item| item.doc_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 5]);

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let meta = realtime.dump(Arc::clone(&storage), None).unwrap();
    assert_eq!(meta.doc_count, 4);

    let reader = SegmentDataReader::open(Arc::clone(&storage)).unwrap();
    let mut keys = reader.read_primary_keys(1).unwrap();
    keys.sort_unstable();
    assert_eq!(keys, vec![(0, 5), (1, 1), (2, 2), (3, 3)]);

    let normal = NormalSegment::open("flushed", storage, &config(), &registry, 0, deletions).unwrap();
    let flushed = SegmentSet::new(&config());
    flushed.add_segment(Arc::new(Segment::Normal(normal)));
    let again = flushed.search(WorkerId(0), &query(1, 0.0, 10)).unwrap();
    assert_eq!(again[0].items, results[0].items);
}

#[test]
fn test_merge_with_reclaim_and_search() {
    let registry = Arc::new(EngineRegistry::with_defaults());
    let a: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let b: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    build_segment(Arc::clone(&a), &registry, 0, 4);
    build_segment(Arc::clone(&b), &registry, 4, 4);

    // Global docs 1, 2 and 6 are deleted; survivors are packed.
    let reclaim = DocIdRemap::new(vec![0, u32::MAX, u32::MAX, 1, 2, 3, u32::MAX, 4]);
    let sources = vec![
        MergeSource::new("a", Arc::new(SegmentDataReader::open(a).unwrap()), 0)
            .with_global_remap(reclaim.clone()),
        MergeSource::new("b", Arc::new(SegmentDataReader::open(b).unwrap()), 4)
            .with_global_remap(reclaim),
    ];
    let output: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let merger = SegmentMerger::new(config(), Arc::clone(&registry));
    let outcome = merger
        .merge(&sources, &MergeTask::new(vec![1]), Arc::clone(&output))
        .unwrap();
    assert_eq!(outcome.stats.docs_merged, 5);
    assert_eq!(outcome.stats.docs_dropped, 3);
    assert!(outcome.meta.is_merged);

    let merged = NormalSegment::open(
        "merged",
        output,
        &config(),
        &registry,
        0,
        Arc::new(DeletionMap::new()),
    )
    .unwrap();
    let set = SegmentSet::new(&config());
    set.add_segment(Arc::new(Segment::Normal(merged)));
    let results = set.search(WorkerId(0), &query(1, 0.0, 10)).unwrap();
    let found: Vec<(DocId, f32)> = results[0]
        .items
        .iter()
        .map(|item| (item.doc_id, item.score))
        .collect();
    // pks 0, 3, 4, 5, 7 at x = pk
    assert_eq!(
        found,
        vec![(0, 0.0), (1, 9.0), (2, 16.0), (3, 25.0), (4, 49.0)]
    );
}

#[test]
fn test_concurrent_workers_reuse_their_contexts() {
    let registry = Arc::new(EngineRegistry::with_defaults());
    let set = Arc::new(SegmentSet::new(&config()));
    let deletions = Arc::new(DeletionMap::new());
    for n in 0..3u32 {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        build_segment(Arc::clone(&storage), &registry, (n * 8) as u64, 8);
        let segment = NormalSegment::open(
            format!("seg_{n}"),
            storage,
            &config(),
            &registry,
            n * 8,
            Arc::clone(&deletions),
        )
        .unwrap();
        set.add_segment(Arc::new(Segment::Normal(segment)));
    }

    thread::scope(|scope| {
        for worker in 0..4usize {
            let set = Arc::clone(&set);
            scope.spawn(move || {
                for round in 0..25 {
                    let x = ((worker * 25 + round) % 24) as f32;
                    let results = set.search(WorkerId(worker), &query(1, x, 1)).unwrap();
                    assert_eq!(results[0].items[0].doc_id, x as DocId);
                    assert!(results[0].failed_segments.is_empty());
                }
            });
        }
    });

    // One context per worker and segment, however many queries ran.
    assert_eq!(set.contexts().len(), 4 * 3);
}
