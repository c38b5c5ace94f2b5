//! Batch segment builder.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Result, VecSegError};
use crate::segment::builder::{BuildRecord, BuilderState};
use crate::segment::data_io::SegmentDataWriter;
use crate::segment::embedding_buffer::{EmbeddingBuffer, EmbeddingDataHolder};
use crate::segment::meta::{SegmentKind, SegmentMeta, SubIndexMeta};
use crate::segment::pk_table::PrimaryKeyTable;
use crate::storage::Storage;
use crate::vector::config::IndexConfig;
use crate::vector::core::doc::{DocId, DocIdRemap, PrimaryKey, SubIndexId};
use crate::vector::engine::params::EngineParams;
use crate::vector::engine::registry::{AlgorithmKind, EngineRegistry};
use crate::vector::engine::{BuildStats, EmbeddingSource, EngineConfig};

/// Accumulates documents and writes one immutable segment.
///
/// Re-adding a primary key replaces its previous document. Nothing touches
/// storage until [`NormalSegmentBuilder::dump`], which writes segment
/// metadata last so an interrupted dump never leaves a readable segment.
#[derive(Debug)]
pub struct NormalSegmentBuilder {
    config: Arc<IndexConfig>,
    registry: Arc<EngineRegistry>,
    holder: EmbeddingDataHolder,
    pk_table: PrimaryKeyTable,
    state: BuilderState,
    is_merged: bool,
}

/// What to build for one sub-index.
#[derive(Debug, Clone, Copy)]
struct SubIndexPlan {
    sub_index_id: SubIndexId,
    doc_count: usize,
    kind: AlgorithmKind,
}

#[derive(Debug)]
struct BuiltBlob {
    plan: SubIndexPlan,
    data: Vec<u8>,
    stats: BuildStats,
}

impl NormalSegmentBuilder {
    pub fn new(config: Arc<IndexConfig>, registry: Arc<EngineRegistry>) -> Result<Self> {
        config.validate()?;
        if !registry.contains(config.builder_algorithm) {
            return Err(VecSegError::config(format!(
                "builder algorithm {} is not registered",
                config.builder_algorithm
            )));
        }
        let holder = EmbeddingDataHolder::new(config.embedding_bytes(), config.buffer.clone());
        Ok(NormalSegmentBuilder {
            config,
            registry,
            holder,
            pk_table: PrimaryKeyTable::new(),
            state: BuilderState::Building,
            is_merged: false,
        })
    }

    /// Mark the output as the product of a merge.
    pub fn set_merged(&mut self, is_merged: bool) {
        self.is_merged = is_merged;
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            BuilderState::Building => Ok(()),
            state => Err(VecSegError::invalid_operation(format!(
                "normal segment builder is {state:?}"
            ))),
        }
    }

    /// Add a document, replacing any live document with the same key.
    pub fn build(&mut self, record: &BuildRecord) -> Result<()> {
        self.ensure_building()?;
        if record.sub_index_ids.is_empty() {
            return Err(VecSegError::invalid_operation(format!(
                "pk {} lists no sub-index",
                record.pk
            )));
        }
        record
            .embedding
            .check(self.config.dimension, self.config.element_type)?;

        for &sub_index_id in &record.sub_index_ids {
            if let Some(owner) = self.pk_table.owner(sub_index_id, record.doc_id)
                && owner != record.pk
            {
                return Err(VecSegError::consistency(format!(
                    "doc {} is already bound to pk {owner} in sub-index {sub_index_id}",
                    record.doc_id
                )));
            }
        }

        if let Some((old_doc_id, sub_index_ids)) = self.pk_table.binding(record.pk)? {
            self.holder.remove(old_doc_id, &sub_index_ids)?;
            self.pk_table.remove(record.pk)?;
        }
        let bytes = record.embedding.to_bytes();
        for &sub_index_id in &record.sub_index_ids {
            self.holder.add(&bytes, record.doc_id, sub_index_id)?;
        }
        self.pk_table
            .add(record.pk, record.doc_id, &record.sub_index_ids)
    }

    /// Add one already-encoded embedding to a single sub-index.
    ///
    /// Used when re-batching documents extracted from existing segments:
    /// the same key may arrive once per sub-index, so only the binding in
    /// `sub_index_id` is replaced.
    pub fn add_extracted(
        &mut self,
        pk: PrimaryKey,
        doc_id: DocId,
        sub_index_id: SubIndexId,
        embedding: &[u8],
    ) -> Result<()> {
        self.ensure_building()?;
        if let Some(owner) = self.pk_table.owner(sub_index_id, doc_id)
            && owner != pk
        {
            return Err(VecSegError::consistency(format!(
                "doc {doc_id} is already bound to pk {owner} in sub-index {sub_index_id}"
            )));
        }
        match self.pk_table.stored_doc_id(pk, sub_index_id) {
            Some(existing) if existing == doc_id => return Ok(()),
            Some(existing) => {
                self.holder.remove(existing, &[sub_index_id])?;
                self.pk_table.remove_from(pk, sub_index_id);
            }
            None => {}
        }
        self.holder.add(embedding, doc_id, sub_index_id)?;
        self.pk_table.add(pk, doc_id, &[sub_index_id])
    }

    /// Remove the document of `pk`. Returns whether it was live.
    pub fn delete(&mut self, pk: PrimaryKey) -> Result<bool> {
        self.ensure_building()?;
        let Some((doc_id, sub_index_ids)) = self.pk_table.binding(pk)? else {
            return Ok(false);
        };
        self.holder.remove(doc_id, &sub_index_ids)?;
        self.pk_table.remove(pk)?;
        Ok(true)
    }

    pub fn contains(&self, pk: PrimaryKey) -> bool {
        self.pk_table.is_exist(pk)
    }

    /// Number of distinct live primary keys.
    pub fn doc_count(&self) -> usize {
        self.pk_table.live_count()
    }

    /// Documents held for one sub-index.
    pub fn sub_index_doc_count(&self, sub_index_id: SubIndexId) -> usize {
        self.holder.doc_count(sub_index_id)
    }

    pub fn sub_index_ids(&self) -> Vec<SubIndexId> {
        self.holder.sub_index_ids()
    }

    /// Bytes held by embedding buffers.
    pub fn memory_bytes(&self) -> usize {
        self.holder.allocated_bytes()
    }

    /// Write the accumulated documents as one segment into `storage`.
    ///
    /// With a `remap`, every doc-id is written as its remapped value and
    /// documents remapped to `INVALID_DOC_ID` are dropped. The builder is
    /// spent afterwards, whether the dump succeeds or not.
    pub fn dump(
        &mut self,
        storage: Arc<dyn Storage>,
        remap: Option<&DocIdRemap>,
    ) -> Result<SegmentMeta> {
        self.ensure_building()?;
        let started = Instant::now();
        if let Some(remap) = remap {
            self.pk_table.set_remap(remap.clone());
        }

        let result = self.dump_segment(storage, remap);
        self.holder.clear();
        self.pk_table.clear();
        match result {
            Ok(meta) => {
                self.state = BuilderState::Dumped;
                info!(
                    sub_indices = meta.sub_indices.len(),
                    doc_count = meta.doc_count,
                    total_bytes = meta.total_bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "normal segment dumped"
                );
                Ok(meta)
            }
            Err(e) => {
                self.state = BuilderState::Failed;
                warn!(error = %e, "normal segment dump failed");
                Err(e)
            }
        }
    }

    fn dump_segment(
        &mut self,
        storage: Arc<dyn Storage>,
        remap: Option<&DocIdRemap>,
    ) -> Result<SegmentMeta> {
        let mut writer = SegmentDataWriter::create(storage, self.config.embedding_bytes())?;
        match self.write_segment(&mut writer, remap) {
            Ok(mut meta) => {
                writer.finish(&mut meta)?;
                Ok(meta)
            }
            Err(e) => {
                if let Err(abort_error) = writer.abort() {
                    warn!(error = %abort_error, "failed to remove partial segment files");
                }
                Err(e)
            }
        }
    }

    fn plan(&mut self, remap: Option<&DocIdRemap>) -> Result<Vec<SubIndexPlan>> {
        let buffered = self.holder.sub_index_ids();
        let keyed = self.pk_table.sub_index_ids();
        if buffered != keyed {
            return Err(VecSegError::consistency(format!(
                "embedding buffers hold sub-indices {buffered:?} but primary keys cover {keyed:?}"
            )));
        }

        let mut plans = Vec::with_capacity(buffered.len());
        for sub_index_id in buffered {
            if let Some(remap) = remap
                && let Some(buffer) = self.holder.buffer_mut(sub_index_id)
            {
                for doc_id in buffer.doc_ids() {
                    if !remap.is_live(doc_id) {
                        buffer.remove(doc_id);
                    }
                }
            }
            let doc_count = self.holder.doc_count(sub_index_id);
            let keys = self.pk_table.doc_count(sub_index_id);
            if doc_count != keys {
                return Err(VecSegError::consistency(format!(
                    "sub-index {sub_index_id}: {doc_count} buffered embeddings but {keys} primary keys"
                )));
            }
            if doc_count == 0 {
                continue;
            }
            plans.push(SubIndexPlan {
                sub_index_id,
                doc_count,
                kind: self.algorithm_for(doc_count),
            });
        }
        Ok(plans)
    }

    fn algorithm_for(&self, doc_count: usize) -> AlgorithmKind {
        if doc_count < self.config.linear_build_threshold && !self.config.distributed_build {
            AlgorithmKind::Linear
        } else {
            self.config.builder_algorithm
        }
    }

    fn write_segment(
        &mut self,
        writer: &mut SegmentDataWriter,
        remap: Option<&DocIdRemap>,
    ) -> Result<SegmentMeta> {
        let plans = self.plan(remap)?;

        // Linear blobs already hold every embedding.
        if self.config.store_embeddings {
            for plan in plans.iter().filter(|p| p.kind != AlgorithmKind::Linear) {
                let buffer = self.buffer_of(plan.sub_index_id)?;
                let mut source = RemappedSource::new(buffer.create_iterator(), remap);
                writer.write_embeddings(plan.sub_index_id, &mut source)?;
            }
        }

        let mut jobs = Vec::with_capacity(plans.len());
        for plan in plans {
            let buffer = self.holder.take_buffer(plan.sub_index_id).ok_or_else(|| {
                VecSegError::consistency(format!(
                    "embedding buffer of sub-index {} disappeared",
                    plan.sub_index_id
                ))
            })?;
            jobs.push((plan, buffer));
        }
        let built = self.build_blobs(jobs, remap)?;

        let mut meta = SegmentMeta::new(
            SegmentKind::Normal,
            self.config.dimension,
            self.config.element_type,
            self.config.distance_metric,
        );
        meta.is_merged = self.is_merged;
        for blob in built {
            let sub_index_id = blob.plan.sub_index_id;
            writer.write_index_blob(sub_index_id, &blob.data)?;
            writer.write_primary_keys(sub_index_id, &self.pk_table.entries(sub_index_id))?;
            let searcher = match blob.plan.kind {
                AlgorithmKind::Linear => AlgorithmKind::Linear,
                _ => self.config.searcher_algorithm,
            };
            meta.insert_sub_index(
                sub_index_id,
                SubIndexMeta {
                    doc_count: blob.plan.doc_count as u64,
                    builder_name: blob.plan.kind.name().to_string(),
                    searcher_name: searcher.name().to_string(),
                    build_stats: blob.stats,
                    has_embeddings: false,
                },
            );
        }
        Ok(meta)
    }

    fn buffer_of(&mut self, sub_index_id: SubIndexId) -> Result<&mut EmbeddingBuffer> {
        self.holder.buffer_mut(sub_index_id).ok_or_else(|| {
            VecSegError::consistency(format!("no embedding buffer for sub-index {sub_index_id}"))
        })
    }

    /// Build every planned blob, one sub-index per pool thread.
    fn build_blobs(
        &self,
        jobs: Vec<(SubIndexPlan, EmbeddingBuffer)>,
        remap: Option<&DocIdRemap>,
    ) -> Result<Vec<BuiltBlob>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let overrides = self.config.build_params()?;
        let base = EngineConfig {
            dimension: self.config.dimension,
            element_type: self.config.element_type,
            metric: self.config.distance_metric,
            params: EngineParams::new(),
        };
        let threads = self.config.effective_build_threads().min(jobs.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| VecSegError::engine(format!("failed to start build threads: {e}")))?;

        let registry = &self.registry;
        pool.install(|| {
            jobs.into_par_iter()
                .map(|(plan, buffer)| build_blob(registry, &base, &overrides, plan, buffer, remap))
                .collect::<Result<Vec<_>>>()
        })
    }
}

fn build_blob(
    registry: &EngineRegistry,
    base: &EngineConfig,
    overrides: &EngineParams,
    plan: SubIndexPlan,
    mut buffer: EmbeddingBuffer,
    remap: Option<&DocIdRemap>,
) -> Result<BuiltBlob> {
    let engine = registry.get(plan.kind)?;
    let params = registry.tuner().tune(plan.kind, plan.doc_count, overrides);
    let config = base.with_params(params);
    let mut builder = engine.create_builder(&config, plan.doc_count)?;

    if builder.needs_training() {
        let mut source = RemappedSource::new(buffer.create_iterator(), remap);
        builder.train(&mut source)?;
        source.rewind()?;
        builder.build(&mut source)?;
    } else {
        let mut source = RemappedSource::new(buffer.into_single_pass(), remap);
        builder.build(&mut source)?;
    }

    let mut data = Vec::new();
    builder.dump(&mut data)?;
    let mut stats = builder.stats();
    if stats.built_count != plan.doc_count as u64 {
        return Err(VecSegError::engine(format!(
            "sub-index {}: {} engine built {} of {} documents",
            plan.sub_index_id, plan.kind, stats.built_count, plan.doc_count
        )));
    }
    stats.dumped_bytes = data.len() as u64;
    debug!(
        sub_index_id = plan.sub_index_id,
        algorithm = plan.kind.name(),
        doc_count = plan.doc_count,
        blob_bytes = data.len(),
        "index blob built"
    );
    Ok(BuiltBlob { plan, data, stats })
}

/// Reports each doc-id through an optional remap.
///
/// Documents the remap drops must already be gone from `inner`.
struct RemappedSource<'r, S> {
    inner: S,
    remap: Option<&'r DocIdRemap>,
}

impl<'r, S: EmbeddingSource> RemappedSource<'r, S> {
    fn new(inner: S, remap: Option<&'r DocIdRemap>) -> Self {
        RemappedSource { inner, remap }
    }
}

impl<S: EmbeddingSource> EmbeddingSource for RemappedSource<'_, S> {
    fn next_embedding(&mut self) -> Option<(DocId, &[u8])> {
        let (doc_id, embedding) = self.inner.next_embedding()?;
        let doc_id = match self.remap {
            Some(remap) => remap.get(doc_id),
            None => doc_id,
        };
        Some((doc_id, embedding))
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::segment::data_io::SegmentDataReader;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
    use crate::vector::core::distance::DistanceMetric;
    use crate::vector::core::doc::INVALID_DOC_ID;
    use crate::vector::engine::linear::LinearEngine;
    use crate::vector::engine::{
        AnnIndexEngine, IndexBuilder, IndexHandle, Streamer, StreamerResource,
    };

    /// A graph-kind engine that stores linear blobs but insists on training.
    #[derive(Debug)]
    struct TrainedLinearEngine;

    struct TrainedBuilder {
        inner: Box<dyn IndexBuilder>,
        trained: u64,
    }

    impl std::fmt::Debug for TrainedBuilder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TrainedBuilder")
                .field("trained", &self.trained)
                .finish()
        }
    }

    impl IndexBuilder for TrainedBuilder {
        fn needs_training(&self) -> bool {
            true
        }

        fn train(&mut self, source: &mut dyn EmbeddingSource) -> Result<()> {
            while source.next_embedding().is_some() {
                self.trained += 1;
            }
            Ok(())
        }

        fn build(&mut self, source: &mut dyn EmbeddingSource) -> Result<()> {
            self.inner.build(source)
        }

        fn dump(&mut self, out: &mut dyn Write) -> Result<u64> {
            self.inner.dump(out)
        }

        fn stats(&self) -> BuildStats {
            BuildStats {
                trained_count: self.trained,
                ..self.inner.stats()
            }
        }
    }

    impl AnnIndexEngine for TrainedLinearEngine {
        fn kind(&self) -> AlgorithmKind {
            AlgorithmKind::Graph
        }

        fn create_builder(
            &self,
            config: &EngineConfig,
            doc_count: usize,
        ) -> Result<Box<dyn IndexBuilder>> {
            Ok(Box::new(TrainedBuilder {
                inner: LinearEngine.create_builder(config, doc_count)?,
                trained: 0,
            }))
        }

        fn create_searcher(
            &self,
            config: &EngineConfig,
            blob: &[u8],
        ) -> Result<Box<dyn IndexHandle>> {
            LinearEngine.create_searcher(config, blob)
        }

        fn create_streamer(
            &self,
            config: &EngineConfig,
            resource: StreamerResource<'_>,
        ) -> Result<Box<dyn Streamer>> {
            LinearEngine.create_streamer(config, resource)
        }
    }

    fn config(threshold: usize) -> Arc<IndexConfig> {
        Arc::new(
            IndexConfig::builder()
                .dimension(2)
                .distance_metric(DistanceMetric::SquaredEuclidean)
                .algorithm(AlgorithmKind::Graph)
                .linear_build_threshold(threshold)
                .build_threads(2)
                .build()
                .unwrap(),
        )
    }

    fn registry() -> Arc<EngineRegistry> {
        Arc::new(
            EngineRegistry::builder()
                .register(Arc::new(TrainedLinearEngine))
                .build(),
        )
    }

    fn storage() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new(MemoryStorageConfig::default()))
    }

    #[test]
    fn test_upsert_replaces_previous_document() {
        let mut builder = NormalSegmentBuilder::new(config(1000), registry()).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![7], vec![1.0, 1.0]))
            .unwrap();
        builder
            .build(&BuildRecord::new(1, 3, vec![7], vec![2.0, 2.0]))
            .unwrap();
        assert_eq!(builder.doc_count(), 1);
        assert_eq!(builder.sub_index_doc_count(7), 1);

        let storage = storage();
        let meta = builder.dump(Arc::clone(&storage), None).unwrap();
        assert_eq!(meta.doc_count, 1);

        let reader = SegmentDataReader::open(storage).unwrap();
        assert_eq!(reader.read_primary_keys(7).unwrap(), vec![(1, 3)]);
    }

    #[test]
    fn test_rejected_upsert_keeps_previous_document() {
        let mut builder = NormalSegmentBuilder::new(config(1000), registry()).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![7], vec![1.0, 1.0]))
            .unwrap();
        builder
            .build(&BuildRecord::new(2, 1, vec![7], vec![2.0, 2.0]))
            .unwrap();

        let err = builder
            .build(&BuildRecord::new(1, 1, vec![7], vec![3.0, 3.0]))
            .unwrap_err();
        assert!(matches!(err, VecSegError::Consistency(_)));
        assert!(builder.build(&BuildRecord::new(1, 5, vec![7], vec![3.0])).is_err());
        assert_eq!(builder.doc_count(), 2);
        assert_eq!(builder.sub_index_doc_count(7), 2);

        let storage = storage();
        builder.dump(Arc::clone(&storage), None).unwrap();
        let reader = SegmentDataReader::open(storage).unwrap();
        assert_eq!(reader.read_primary_keys(7).unwrap(), vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_delete() {
        let mut builder = NormalSegmentBuilder::new(config(1000), registry()).unwrap();
        builder
            .build(&BuildRecord::new(5, 0, vec![1, 2], vec![0.0, 1.0]))
            .unwrap();
        assert!(builder.delete(5).unwrap());
        assert!(!builder.delete(5).unwrap());
        assert!(builder.sub_index_ids().is_empty());
    }

    #[test]
    fn test_rejects_wrong_dimension_and_empty_sub_indices() {
        let mut builder = NormalSegmentBuilder::new(config(1000), registry()).unwrap();
        assert!(
            builder
                .build(&BuildRecord::new(1, 0, vec![1], vec![1.0]))
                .is_err()
        );
        assert!(
            builder
                .build(&BuildRecord::new(1, 0, vec![], vec![1.0, 2.0]))
                .is_err()
        );
    }

    #[test]
    fn test_small_sub_index_uses_linear() {
        let mut builder = NormalSegmentBuilder::new(config(10), registry()).unwrap();
        for doc_id in 0..3 {
            builder
                .build(&BuildRecord::new(100 + doc_id as u64, doc_id, vec![0], vec![doc_id as f32, 0.0]))
                .unwrap();
        }
        let storage = storage();
        let meta = builder.dump(Arc::clone(&storage), None).unwrap();
        let sub = meta.sub_index(0).unwrap();
        assert_eq!(sub.builder_name, "linear");
        assert_eq!(sub.searcher_name, "linear");
        assert!(!sub.has_embeddings);
        assert_eq!(builder.state(), BuilderState::Dumped);
    }

    #[test]
    fn test_trained_build_writes_embeddings() {
        let mut builder = NormalSegmentBuilder::new(config(0), registry()).unwrap();
        for doc_id in 0..4u32 {
            builder
                .build(&BuildRecord::new(doc_id as u64, doc_id, vec![0, 1], vec![doc_id as f32, 1.0]))
                .unwrap();
        }
        let storage = storage();
        let meta = builder.dump(Arc::clone(&storage), None).unwrap();
        assert_eq!(meta.doc_count, 8);
        let sub = meta.sub_index(1).unwrap();
        assert_eq!(sub.builder_name, "graph");
        assert_eq!(sub.build_stats.trained_count, 4);
        assert!(sub.has_embeddings);

        let reader = SegmentDataReader::open(storage).unwrap();
        let mut seen = Vec::new();
        reader
            .for_each_embedding(1, &mut |doc_id, _| {
                seen.push(doc_id);
                Ok(())
            })
            .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_dump_with_remap_drops_reclaimed_docs() {
        let mut builder = NormalSegmentBuilder::new(config(0), registry()).unwrap();
        for doc_id in 0..4u32 {
            builder
                .build(&BuildRecord::new(10 + doc_id as u64, doc_id, vec![3], vec![doc_id as f32, 0.0]))
                .unwrap();
        }
        let remap = DocIdRemap::new(vec![INVALID_DOC_ID, 0, INVALID_DOC_ID, 1]);
        let storage = storage();
        let meta = builder.dump(Arc::clone(&storage), Some(&remap)).unwrap();
        assert_eq!(meta.doc_count, 2);

        let reader = SegmentDataReader::open(storage).unwrap();
        assert_eq!(reader.read_primary_keys(3).unwrap(), vec![(11, 0), (13, 1)]);
    }

    #[test]
    fn test_builder_is_spent_after_dump() {
        let mut builder = NormalSegmentBuilder::new(config(1000), registry()).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![0], vec![1.0, 0.0]))
            .unwrap();
        builder.dump(storage(), None).unwrap();
        assert!(matches!(
            builder.build(&BuildRecord::new(2, 1, vec![0], vec![1.0, 0.0])),
            Err(VecSegError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_extracted_adds_per_sub_index() {
        let mut builder = NormalSegmentBuilder::new(config(1000), registry()).unwrap();
        let bytes = crate::vector::core::embedding::ElementType::Float32.encode(&[1.0, 2.0]);
        builder.add_extracted(9, 0, 1, &bytes).unwrap();
        builder.add_extracted(9, 0, 2, &bytes).unwrap();
        builder.add_extracted(9, 0, 2, &bytes).unwrap();
        assert_eq!(builder.doc_count(), 1);
        assert_eq!(builder.sub_index_ids(), vec![1, 2]);
        assert!(builder.add_extracted(10, 0, 1, &bytes).is_err());
    }
}
