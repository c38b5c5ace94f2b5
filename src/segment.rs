//! Segments and everything that writes them.
//!
//! A segment is either *normal*, an immutable directory written by a
//! [`builder::NormalSegmentBuilder`] or a merge, or *realtime*, a set of live
//! streamers fed by a [`builder::RealtimeSegmentBuilder`]. Both are addressed
//! by a base doc-id: segment-local doc-id `d` is global doc-id `base + d`.
//!
//! # Module Structure
//!
//! - `embedding_buffer`: chunked accumulation of embeddings per sub-index
//! - `pk_table`: primary-key to doc-id bookkeeping
//! - `data_io`: on-disk segment layout
//! - `meta`: `segment.meta` and file names
//! - `deletion`: tombstones shared with searchers
//! - `builder`: normal and realtime builders
//! - `merger`: re-batching existing segments into one

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, VecSegError};
use crate::segment::builder::RealtimeIndex;
use crate::segment::data_io::SegmentDataReader;
use crate::segment::deletion::DeletionMap;
use crate::segment::meta::SegmentKind;
use crate::storage::Storage;
use crate::vector::config::IndexConfig;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::doc::{DocId, SubIndexId};
use crate::vector::engine::registry::EngineRegistry;
use crate::vector::engine::{EngineConfig, IndexHandle, Streamer};

pub mod builder;
pub mod data_io;
pub mod deletion;
pub mod embedding_buffer;
pub mod merger;
pub mod meta;
pub mod pk_table;

/// The searchable index of one sub-index inside a segment.
#[derive(Debug, Clone)]
pub enum SegmentHandle {
    Index(Arc<dyn IndexHandle>),
    Stream(Arc<dyn Streamer>),
}

impl SegmentHandle {
    pub fn as_handle(&self) -> &dyn IndexHandle {
        match self {
            SegmentHandle::Index(handle) => handle.as_ref(),
            SegmentHandle::Stream(streamer) => streamer.as_handle(),
        }
    }
}

/// An opened, immutable segment directory.
#[derive(Debug)]
pub struct NormalSegment {
    name: String,
    reader: Arc<SegmentDataReader>,
    handles: BTreeMap<SubIndexId, Arc<dyn IndexHandle>>,
    base_doc_id: DocId,
    deletions: Arc<DeletionMap>,
    engine_config: EngineConfig,
}

impl NormalSegment {
    /// Open the segment in `storage` and load one searcher per sub-index.
    pub fn open(
        name: impl Into<String>,
        storage: Arc<dyn Storage>,
        config: &IndexConfig,
        registry: &EngineRegistry,
        base_doc_id: DocId,
        deletions: Arc<DeletionMap>,
    ) -> Result<Self> {
        let name = name.into();
        let reader = Arc::new(SegmentDataReader::open(storage)?);
        let meta = reader.meta();
        if meta.dimension != config.dimension
            || meta.element_type != config.element_type
            || meta.distance_metric != config.distance_metric
        {
            return Err(VecSegError::config(format!(
                "segment {name} was built for dimension {} {} {} but the index uses dimension {} {} {}",
                meta.dimension,
                meta.element_type.name(),
                meta.distance_metric.name(),
                config.dimension,
                config.element_type.name(),
                config.distance_metric.name()
            )));
        }

        let engine_config = EngineConfig {
            dimension: config.dimension,
            element_type: config.element_type,
            metric: config.distance_metric,
            params: config.search_params()?,
        };
        let mut handles: BTreeMap<SubIndexId, Arc<dyn IndexHandle>> = BTreeMap::new();
        for (sub_index_id, sub) in &meta.sub_indices {
            let engine = registry.get_by_name(&sub.searcher_name)?;
            let blob = reader.read_index_blob(*sub_index_id)?;
            let handle = engine.create_searcher(&engine_config, &blob)?;
            if handle.doc_count() as u64 != sub.doc_count {
                return Err(VecSegError::consistency(format!(
                    "segment {name} sub-index {sub_index_id}: searcher holds {} documents, metadata records {}",
                    handle.doc_count(),
                    sub.doc_count
                )));
            }
            handles.insert(*sub_index_id, Arc::from(handle));
        }
        debug!(
            segment = %name,
            base_doc_id,
            sub_indices = handles.len(),
            doc_count = meta.doc_count,
            "normal segment opened"
        );

        Ok(NormalSegment {
            name,
            engine_config,
            reader,
            handles,
            base_doc_id,
            deletions,
        })
    }

    pub fn reader(&self) -> &Arc<SegmentDataReader> {
        &self.reader
    }

    pub fn index_handle(&self, sub_index_id: SubIndexId) -> Option<&Arc<dyn IndexHandle>> {
        self.handles.get(&sub_index_id)
    }
}

/// A live segment searched through its builder's streamers.
#[derive(Debug)]
pub struct RealtimeSegment {
    name: String,
    index: Arc<RealtimeIndex>,
    base_doc_id: DocId,
    deletions: Arc<DeletionMap>,
}

impl RealtimeSegment {
    pub fn new(
        name: impl Into<String>,
        index: Arc<RealtimeIndex>,
        base_doc_id: DocId,
        deletions: Arc<DeletionMap>,
    ) -> Self {
        RealtimeSegment {
            name: name.into(),
            index,
            base_doc_id,
            deletions,
        }
    }

    pub fn index(&self) -> &Arc<RealtimeIndex> {
        &self.index
    }
}

/// A segment of either kind.
#[derive(Debug)]
pub enum Segment {
    Normal(NormalSegment),
    Realtime(RealtimeSegment),
}

impl Segment {
    pub fn name(&self) -> &str {
        match self {
            Segment::Normal(segment) => &segment.name,
            Segment::Realtime(segment) => &segment.name,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Normal(_) => SegmentKind::Normal,
            Segment::Realtime(_) => SegmentKind::Realtime,
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self, Segment::Realtime(_))
    }

    /// Global doc-id of local doc-id zero.
    pub fn base_doc_id(&self) -> DocId {
        match self {
            Segment::Normal(segment) => segment.base_doc_id,
            Segment::Realtime(segment) => segment.base_doc_id,
        }
    }

    /// Tombstones, indexed by global doc-id.
    pub fn deletions(&self) -> &Arc<DeletionMap> {
        match self {
            Segment::Normal(segment) => &segment.deletions,
            Segment::Realtime(segment) => &segment.deletions,
        }
    }

    /// Layout and search parameters of this segment's indices.
    pub fn engine_config(&self) -> &EngineConfig {
        match self {
            Segment::Normal(segment) => &segment.engine_config,
            Segment::Realtime(segment) => segment.index.engine_config(),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.engine_config().metric
    }

    /// Tombstone a document by its global doc-id.
    pub fn delete(&self, global_doc_id: DocId) -> bool {
        self.deletions().delete(global_doc_id)
    }

    pub fn doc_count(&self) -> usize {
        match self {
            Segment::Normal(segment) => segment.handles.values().map(|h| h.doc_count()).sum(),
            Segment::Realtime(segment) => segment.index.doc_count(),
        }
    }

    pub fn sub_index_ids(&self) -> Vec<SubIndexId> {
        match self {
            Segment::Normal(segment) => segment.handles.keys().copied().collect(),
            Segment::Realtime(segment) => segment.index.sub_index_ids(),
        }
    }

    /// Searchable index of one sub-index, if the segment has it.
    pub fn handle(&self, sub_index_id: SubIndexId) -> Option<SegmentHandle> {
        match self {
            Segment::Normal(segment) => segment
                .handles
                .get(&sub_index_id)
                .map(|handle| SegmentHandle::Index(Arc::clone(handle))),
            Segment::Realtime(segment) => segment
                .index
                .streamer(sub_index_id)
                .map(SegmentHandle::Stream),
        }
    }

    /// Key identifying one sub-index searcher of this segment.
    pub fn searcher_identity(&self, sub_index_id: SubIndexId) -> String {
        format!("{}/{}", self.name(), sub_index_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::builder::{BuildRecord, NormalSegmentBuilder, RealtimeSegmentBuilder};
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};

    fn config(dimension: usize) -> Arc<IndexConfig> {
        Arc::new(IndexConfig::builder().dimension(dimension).build().unwrap())
    }

    #[test]
    fn test_open_normal_segment() {
        let registry = Arc::new(EngineRegistry::with_defaults());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let mut builder = NormalSegmentBuilder::new(config(2), Arc::clone(&registry)).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![3, 4], vec![1.0, 0.0]))
            .unwrap();
        builder.dump(Arc::clone(&storage), None).unwrap();

        let deletions = Arc::new(DeletionMap::new());
        let segment = Segment::Normal(
            NormalSegment::open("seg_0", storage, &config(2), &registry, 100, deletions).unwrap(),
        );
        assert_eq!(segment.sub_index_ids(), vec![3, 4]);
        assert_eq!(segment.doc_count(), 2);
        assert_eq!(segment.base_doc_id(), 100);
        assert!(segment.handle(3).is_some());
        assert!(segment.handle(5).is_none());
        assert_eq!(segment.searcher_identity(3), "seg_0/3");

        assert!(segment.delete(100));
        assert!(segment.deletions().is_deleted(100));
    }

    #[test]
    fn test_open_rejects_layout_mismatch() {
        let registry = Arc::new(EngineRegistry::with_defaults());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let mut builder = NormalSegmentBuilder::new(config(2), Arc::clone(&registry)).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![0], vec![1.0, 0.0]))
            .unwrap();
        builder.dump(Arc::clone(&storage), None).unwrap();

        let result = NormalSegment::open(
            "seg",
            storage,
            &config(3),
            &registry,
            0,
            Arc::new(DeletionMap::new()),
        );
        assert!(matches!(result, Err(VecSegError::Config(_))));
    }

    #[test]
    fn test_realtime_segment_sees_new_sub_indices() {
        let registry = EngineRegistry::with_defaults();
        let mut builder = RealtimeSegmentBuilder::new(config(2), &registry).unwrap();
        let segment = Segment::Realtime(RealtimeSegment::new(
            "rt",
            builder.index(),
            50,
            Arc::new(DeletionMap::new()),
        ));
        assert!(segment.sub_index_ids().is_empty());

        builder
            .build(&BuildRecord::new(1, 0, vec![9], vec![0.5, 0.5]))
            .unwrap();
        assert_eq!(segment.sub_index_ids(), vec![9]);
        assert_eq!(segment.doc_count(), 1);
        assert!(segment.is_realtime());
        assert!(matches!(segment.handle(9), Some(SegmentHandle::Stream(_))));
    }
}
