//! Streaming segment builder.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, VecSegError};
use crate::segment::builder::BuildRecord;
use crate::segment::data_io::{SegmentDataReader, SegmentDataWriter};
use crate::segment::meta::{SegmentKind, SegmentMeta, SubIndexMeta};
use crate::segment::pk_table::PrimaryKeyTable;
use crate::storage::Storage;
use crate::vector::config::IndexConfig;
use crate::vector::core::doc::{DocId, DocIdRemap, PrimaryKey, SubIndexId};
use crate::vector::engine::registry::{AlgorithmKind, EngineRegistry, can_warm_start};
use crate::vector::engine::{
    AnnIndexEngine, BuildStats, EngineConfig, OwnedEmbeddings, Streamer, StreamerResource,
};

/// Live streamers of a realtime segment, one per sub-index.
///
/// Shared between the builder, which creates and feeds streamers, and the
/// searchers reading them.
#[derive(Debug)]
pub struct RealtimeIndex {
    kind: AlgorithmKind,
    engine_config: EngineConfig,
    streamers: RwLock<BTreeMap<SubIndexId, Arc<dyn Streamer>>>,
}

impl RealtimeIndex {
    fn new(kind: AlgorithmKind, engine_config: EngineConfig) -> Self {
        RealtimeIndex {
            kind,
            engine_config,
            streamers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.kind
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    pub fn streamer(&self, sub_index_id: SubIndexId) -> Option<Arc<dyn Streamer>> {
        self.streamers.read().get(&sub_index_id).cloned()
    }

    pub fn sub_index_ids(&self) -> Vec<SubIndexId> {
        self.streamers.read().keys().copied().collect()
    }

    /// Documents across every streamer.
    pub fn doc_count(&self) -> usize {
        self.streamers.read().values().map(|s| s.doc_count()).sum()
    }

    fn snapshot(&self) -> Vec<(SubIndexId, Arc<dyn Streamer>)> {
        self.streamers
            .read()
            .iter()
            .map(|(id, streamer)| (*id, Arc::clone(streamer)))
            .collect()
    }
}

/// Feeds documents straight into live streamers.
///
/// Documents are searchable as soon as `build` returns. `dump` snapshots
/// every streamer into a segment directory and leaves them serving.
#[derive(Debug)]
pub struct RealtimeSegmentBuilder {
    config: Arc<IndexConfig>,
    engine: Arc<dyn AnnIndexEngine>,
    index: Arc<RealtimeIndex>,
    pk_table: PrimaryKeyTable,
    warm_start: Option<Arc<SegmentDataReader>>,
    dump_count: u64,
}

impl RealtimeSegmentBuilder {
    pub fn new(config: Arc<IndexConfig>, registry: &EngineRegistry) -> Result<Self> {
        config.validate()?;
        let kind = config.streamer_algorithm;
        let engine = registry.get(kind)?;
        if !engine.supports_streaming() {
            return Err(VecSegError::config(format!(
                "algorithm {kind} has no streaming index"
            )));
        }
        let params = registry.tuner().tune(kind, 0, &config.build_params()?);
        let engine_config = EngineConfig {
            dimension: config.dimension,
            element_type: config.element_type,
            metric: config.distance_metric,
            params,
        };
        Ok(RealtimeSegmentBuilder {
            config,
            engine,
            index: Arc::new(RealtimeIndex::new(kind, engine_config)),
            pk_table: PrimaryKeyTable::new(),
            warm_start: None,
            dump_count: 0,
        })
    }

    /// Bootstrap new streamers from the blobs of an existing normal segment.
    ///
    /// Only sub-indices whose builder algorithm appears with this streamer
    /// algorithm in the warm-start table are bootstrapped. The documents of a
    /// bootstrapped sub-index become live in this builder under the segment's
    /// primary keys.
    pub fn with_warm_start(mut self, segment: Arc<SegmentDataReader>) -> Self {
        self.warm_start = Some(segment);
        self
    }

    /// The live index shared with searchers.
    pub fn index(&self) -> Arc<RealtimeIndex> {
        Arc::clone(&self.index)
    }

    pub fn contains(&self, pk: PrimaryKey) -> bool {
        self.pk_table.is_exist(pk)
    }

    /// Number of distinct live primary keys.
    pub fn doc_count(&self) -> usize {
        self.pk_table.live_count()
    }

    /// Number of completed dumps.
    pub fn dump_count(&self) -> u64 {
        self.dump_count
    }

    fn streamer_for(&mut self, sub_index_id: SubIndexId) -> Result<Arc<dyn Streamer>> {
        if let Some(streamer) = self.index.streamer(sub_index_id) {
            return Ok(streamer);
        }
        let (created, adopted) = self.create_streamer(sub_index_id)?;
        self.adopt_keys(sub_index_id, created.as_ref(), &adopted)?;
        let mut streamers = self.index.streamers.write();
        Ok(Arc::clone(
            streamers.entry(sub_index_id).or_insert(created),
        ))
    }

    /// Create the streamer of a new sub-index together with the keys of any
    /// documents it starts with.
    fn create_streamer(
        &self,
        sub_index_id: SubIndexId,
    ) -> Result<(Arc<dyn Streamer>, Vec<(PrimaryKey, DocId)>)> {
        let config = &self.index.engine_config;
        if let Some(reader) = &self.warm_start
            && let Ok(sub) = reader.meta().sub_index(sub_index_id)
        {
            let builder_kind = AlgorithmKind::parse_str(&sub.builder_name)?;
            if can_warm_start(builder_kind, self.index.kind) {
                let blob = reader.read_index_blob(sub_index_id)?;
                let keys = reader.read_primary_keys(sub_index_id)?;
                info!(
                    sub_index_id,
                    builder = builder_kind.name(),
                    blob_bytes = blob.len(),
                    adopted = keys.len(),
                    "streamer warm-started from normal segment"
                );
                let streamer = self
                    .engine
                    .create_streamer(config, StreamerResource::WarmStart(&blob))?;
                return Ok((Arc::from(streamer), keys));
            }
        }
        debug!(sub_index_id, algorithm = self.index.kind.name(), "streamer created");
        let streamer = self.engine.create_streamer(config, StreamerResource::Cold)?;
        Ok((Arc::from(streamer), Vec::new()))
    }

    /// Key the documents a warm-started streamer came up with.
    fn adopt_keys(
        &mut self,
        sub_index_id: SubIndexId,
        streamer: &dyn Streamer,
        keys: &[(PrimaryKey, DocId)],
    ) -> Result<()> {
        if streamer.doc_count() != keys.len() {
            return Err(VecSegError::consistency(format!(
                "sub-index {sub_index_id}: warm-start blob holds {} documents but the segment keys {}",
                streamer.doc_count(),
                keys.len()
            )));
        }
        for &(pk, doc_id) in keys {
            if let Some((bound, _)) = self.pk_table.binding(pk)?
                && bound != doc_id
            {
                return Err(VecSegError::consistency(format!(
                    "warm-start pk {pk} maps to doc {doc_id} but is live as doc {bound}"
                )));
            }
        }
        for (adopted, &(pk, doc_id)) in keys.iter().enumerate() {
            if let Err(e) = self.pk_table.add(pk, doc_id, &[sub_index_id]) {
                for &(pk, _) in &keys[..adopted] {
                    self.pk_table.remove_from(pk, sub_index_id);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove_live(&self, doc_id: DocId, sub_index_ids: &[SubIndexId]) -> Result<()> {
        for &sub_index_id in sub_index_ids {
            let streamer = self.index.streamer(sub_index_id).ok_or_else(|| {
                VecSegError::consistency(format!(
                    "doc {doc_id} is keyed in sub-index {sub_index_id} which has no streamer"
                ))
            })?;
            streamer.remove(doc_id)?;
        }
        Ok(())
    }

    /// Add a document, removing any live document with the same key first.
    ///
    /// A doc-id already bound to another key is rejected before anything
    /// changes.
    pub fn build(&mut self, record: &BuildRecord) -> Result<()> {
        if record.sub_index_ids.is_empty() {
            return Err(VecSegError::invalid_operation(format!(
                "pk {} lists no sub-index",
                record.pk
            )));
        }
        record
            .embedding
            .check(self.config.dimension, self.config.element_type)?;

        let mut targets = Vec::with_capacity(record.sub_index_ids.len());
        for &sub_index_id in &record.sub_index_ids {
            targets.push(self.streamer_for(sub_index_id)?);
        }
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
            self.remove_live(old_doc_id, &sub_index_ids)?;
            self.pk_table.remove(record.pk)?;
        }
        let bytes = record.embedding.to_bytes();
        for streamer in &targets {
            streamer.add(record.doc_id, &bytes)?;
        }
        self.pk_table
            .add(record.pk, record.doc_id, &record.sub_index_ids)
    }

    /// Remove the document of `pk`. Returns whether it was live.
    pub fn delete(&mut self, pk: PrimaryKey) -> Result<bool> {
        let Some((doc_id, sub_index_ids)) = self.pk_table.binding(pk)? else {
            return Ok(false);
        };
        self.remove_live(doc_id, &sub_index_ids)?;
        self.pk_table.remove(pk)?;
        Ok(true)
    }

    /// Release resources streamers keep for removed documents.
    pub fn cleanup(&self) -> Result<()> {
        for (_, streamer) in self.index.snapshot() {
            streamer.cleanup()?;
        }
        Ok(())
    }

    /// Snapshot every streamer into `storage` without closing them.
    ///
    /// Reordering documents through a remap is not supported.
    pub fn dump(
        &mut self,
        storage: Arc<dyn Storage>,
        remap: Option<&DocIdRemap>,
    ) -> Result<SegmentMeta> {
        if remap.is_some() {
            return Err(VecSegError::unsupported(
                "realtime segments cannot be dumped through a doc-id remap",
            ));
        }
        let mut writer = SegmentDataWriter::create(storage, self.config.embedding_bytes())?;
        let mut meta = match self.write_snapshot(&mut writer) {
            Ok(meta) => meta,
            Err(e) => {
                if let Err(abort_error) = writer.abort() {
                    warn!(error = %abort_error, "failed to remove partial segment files");
                }
                return Err(e);
            }
        };
        writer.finish(&mut meta)?;
        self.dump_count += 1;
        info!(
            sub_indices = meta.sub_indices.len(),
            doc_count = meta.doc_count,
            dump = self.dump_count,
            "realtime segment snapshot dumped"
        );
        Ok(meta)
    }

    fn write_snapshot(&self, writer: &mut SegmentDataWriter) -> Result<SegmentMeta> {
        let kind = self.index.kind;
        let mut meta = SegmentMeta::new(
            SegmentKind::Realtime,
            self.config.dimension,
            self.config.element_type,
            self.config.distance_metric,
        );

        for (sub_index_id, streamer) in self.index.snapshot() {
            let entries = self.pk_table.entries(sub_index_id);
            if entries.is_empty() {
                continue;
            }
            let live = streamer.doc_count();
            if live != entries.len() {
                return Err(VecSegError::consistency(format!(
                    "sub-index {sub_index_id}: streamer holds {live} documents but {} primary keys are live",
                    entries.len()
                )));
            }

            let mut blob = Vec::new();
            let dumped = streamer.dump(&mut blob)?;
            writer.write_index_blob(sub_index_id, &blob)?;
            writer.write_primary_keys(sub_index_id, &entries)?;

            if self.config.store_embeddings && kind != AlgorithmKind::Linear {
                let mut embeddings = OwnedEmbeddings::default();
                streamer.scan_embeddings(&mut |doc_id, embedding| {
                    embeddings.push(doc_id, embedding.to_vec());
                    Ok(())
                })?;
                writer.write_embeddings(sub_index_id, &mut embeddings)?;
            }

            meta.insert_sub_index(
                sub_index_id,
                SubIndexMeta {
                    doc_count: entries.len() as u64,
                    builder_name: kind.name().to_string(),
                    searcher_name: kind.name().to_string(),
                    build_stats: BuildStats {
                        built_count: entries.len() as u64,
                        dumped_bytes: dumped,
                        ..Default::default()
                    },
                    has_embeddings: false,
                },
            );
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filter::DocFilter;
    use crate::segment::builder::NormalSegmentBuilder;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
    use crate::vector::core::distance::DistanceMetric;
    use crate::vector::core::embedding::ElementType;
    use crate::vector::engine::linear::LinearEngine;
    use crate::vector::engine::{IndexBuilder, IndexHandle};

    /// Exact scan registered under the graph kind, which warm-starts.
    #[derive(Debug)]
    struct GraphLikeEngine;

    impl AnnIndexEngine for GraphLikeEngine {
        fn kind(&self) -> AlgorithmKind {
            AlgorithmKind::Graph
        }

        fn create_builder(
            &self,
            config: &EngineConfig,
            doc_count: usize,
        ) -> Result<Box<dyn IndexBuilder>> {
            LinearEngine.create_builder(config, doc_count)
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

    fn config() -> Arc<IndexConfig> {
        Arc::new(
            IndexConfig::builder()
                .dimension(2)
                .distance_metric(DistanceMetric::SquaredEuclidean)
                .build()
                .unwrap(),
        )
    }

    fn storage() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new(MemoryStorageConfig::default()))
    }

    fn search_one(index: &RealtimeIndex, sub_index_id: SubIndexId, query: &[f32]) -> Vec<DocId> {
        let streamer = index.streamer(sub_index_id).unwrap();
        let handle = streamer.as_handle();
        let mut context = handle.create_context().unwrap();
        context.set_topk(10);
        context.set_filter(DocFilter::None);
        let query = ElementType::Float32.encode(query);
        handle.search(context.as_mut(), &[query.as_slice()]).unwrap();
        context.results()[0].iter().map(|m| m.doc_id).collect()
    }

    #[test]
    fn test_documents_searchable_after_build() {
        let registry = EngineRegistry::with_defaults();
        let mut builder = RealtimeSegmentBuilder::new(config(), &registry).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![5], vec![0.0, 0.0]))
            .unwrap();
        builder
            .build(&BuildRecord::new(2, 1, vec![5], vec![3.0, 3.0]))
            .unwrap();

        let index = builder.index();
        assert_eq!(search_one(&index, 5, &[0.1, 0.1]), vec![0, 1]);
        assert!(index.streamer(6).is_none());
    }

    #[test]
    fn test_upsert_removes_old_document() {
        let registry = EngineRegistry::with_defaults();
        let mut builder = RealtimeSegmentBuilder::new(config(), &registry).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![5], vec![0.0, 0.0]))
            .unwrap();
        builder
            .build(&BuildRecord::new(1, 4, vec![5], vec![1.0, 1.0]))
            .unwrap();
        assert_eq!(builder.doc_count(), 1);
        assert_eq!(search_one(&builder.index(), 5, &[0.0, 0.0]), vec![4]);

        assert!(builder.delete(1).unwrap());
        assert_eq!(builder.index().doc_count(), 0);
    }

    #[test]
    fn test_dump_keeps_serving() {
        let registry = EngineRegistry::with_defaults();
        let mut builder = RealtimeSegmentBuilder::new(config(), &registry).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![0], vec![0.0, 1.0]))
            .unwrap();

        let first = builder.dump(storage(), None).unwrap();
        assert_eq!(first.kind, SegmentKind::Realtime);
        assert_eq!(first.doc_count, 1);

        builder
            .build(&BuildRecord::new(2, 1, vec![0], vec![1.0, 1.0]))
            .unwrap();
        let target = storage();
        let second = builder.dump(Arc::clone(&target), None).unwrap();
        assert_eq!(second.doc_count, 2);
        assert_eq!(builder.dump_count(), 2);

        let reader = SegmentDataReader::open(target).unwrap();
        assert_eq!(reader.read_primary_keys(0).unwrap(), vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_dump_with_remap_is_unsupported() {
        let registry = EngineRegistry::with_defaults();
        let mut builder = RealtimeSegmentBuilder::new(config(), &registry).unwrap();
        let remap = DocIdRemap::identity(1);
        assert!(matches!(
            builder.dump(storage(), Some(&remap)),
            Err(VecSegError::Unsupported(_))
        ));
    }

    #[test]
    fn test_linear_segment_starts_cold() {
        let registry = Arc::new(EngineRegistry::with_defaults());
        let mut normal = NormalSegmentBuilder::new(config(), Arc::clone(&registry)).unwrap();
        normal
            .build(&BuildRecord::new(1, 0, vec![0], vec![0.0, 0.0]))
            .unwrap();
        let segment = storage();
        normal.dump(Arc::clone(&segment), None).unwrap();
        let reader = Arc::new(SegmentDataReader::open(segment).unwrap());

        let mut builder = RealtimeSegmentBuilder::new(config(), &registry)
            .unwrap()
            .with_warm_start(reader);
        builder
            .build(&BuildRecord::new(2, 7, vec![0], vec![1.0, 0.0]))
            .unwrap();
        assert_eq!(search_one(&builder.index(), 0, &[0.0, 0.0]), vec![7]);
    }

    #[test]
    fn test_doc_bound_to_another_key_rejected() {
        let registry = EngineRegistry::with_defaults();
        let mut builder = RealtimeSegmentBuilder::new(config(), &registry).unwrap();
        builder
            .build(&BuildRecord::new(1, 0, vec![5], vec![0.0, 0.0]))
            .unwrap();

        let err = builder
            .build(&BuildRecord::new(2, 0, vec![5], vec![1.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, VecSegError::Consistency(_)));
        assert!(!builder.contains(2));

        builder
            .build(&BuildRecord::new(3, 1, vec![5], vec![2.0, 2.0]))
            .unwrap();
        assert!(builder.build(&BuildRecord::new(3, 0, vec![5], vec![2.0, 2.0])).is_err());
        assert_eq!(builder.doc_count(), 2);
        assert_eq!(search_one(&builder.index(), 5, &[0.0, 0.0]), vec![0, 1]);

        let target = storage();
        builder.dump(Arc::clone(&target), None).unwrap();
        let reader = SegmentDataReader::open(target).unwrap();
        assert_eq!(reader.read_primary_keys(5).unwrap(), vec![(1, 0), (3, 1)]);
    }

    #[test]
    fn test_warm_start_adopts_segment_keys() {
        let config = Arc::new(
            IndexConfig::builder()
                .dimension(2)
                .distance_metric(DistanceMetric::SquaredEuclidean)
                .algorithm(AlgorithmKind::Graph)
                .linear_build_threshold(0)
                .build()
                .unwrap(),
        );
        let registry = Arc::new(
            EngineRegistry::builder()
                .register(Arc::new(GraphLikeEngine))
                .build(),
        );
        let mut normal = NormalSegmentBuilder::new(Arc::clone(&config), Arc::clone(&registry)).unwrap();
        normal
            .build(&BuildRecord::new(1, 0, vec![0], vec![0.0, 0.0]))
            .unwrap();
        normal
            .build(&BuildRecord::new(2, 1, vec![0], vec![3.0, 3.0]))
            .unwrap();
        let segment = storage();
        normal.dump(Arc::clone(&segment), None).unwrap();
        let reader = Arc::new(SegmentDataReader::open(segment).unwrap());

        let mut builder = RealtimeSegmentBuilder::new(Arc::clone(&config), &registry)
            .unwrap()
            .with_warm_start(reader);
        builder
            .build(&BuildRecord::new(3, 2, vec![0], vec![1.0, 0.0]))
            .unwrap();
        assert_eq!(builder.doc_count(), 3);
        assert!(builder.contains(1));

        assert!(matches!(
            builder.build(&BuildRecord::new(4, 0, vec![0], vec![1.0, 1.0])),
            Err(VecSegError::Consistency(_))
        ));
        builder
            .build(&BuildRecord::new(1, 5, vec![0], vec![9.0, 9.0]))
            .unwrap();
        assert_eq!(search_one(&builder.index(), 0, &[0.0, 0.0]), vec![2, 1, 5]);

        let target = storage();
        let meta = builder.dump(Arc::clone(&target), None).unwrap();
        assert_eq!(meta.doc_count, 3);
        let dumped = SegmentDataReader::open(target).unwrap();
        assert_eq!(
            dumped.read_primary_keys(0).unwrap(),
            vec![(2, 1), (3, 2), (1, 5)]
        );
    }
}
