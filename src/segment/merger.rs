//! Merging existing segments into one.
//!
//! Merging never reads index blobs structurally. Each document's primary key
//! comes from the input's primary-key stream and its embedding from, in
//! order of preference, the raw-embedding stream, the engine's own scan of
//! the index blob, or an [`ExternalEmbeddingSource`]. Everything is then
//! re-batched through a fresh [`NormalSegmentBuilder`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, VecSegError};
use crate::segment::builder::NormalSegmentBuilder;
use crate::segment::data_io::SegmentDataReader;
use crate::segment::meta::{ParallelMergeMeta, SegmentMeta, instance_dir};
use crate::storage::{self, Storage};
use crate::vector::config::IndexConfig;
use crate::vector::core::doc::{DocId, DocIdRemap, INVALID_DOC_ID, PrimaryKey, SubIndexId};
use crate::vector::engine::EngineConfig;
use crate::vector::engine::registry::EngineRegistry;

/// Embeddings kept outside the segment, e.g. in a document attribute store.
pub trait ExternalEmbeddingSource: Send + Sync + Debug {
    /// Raw embedding of a segment-local doc-id, if the store has one.
    fn embedding(&self, sub_index_id: SubIndexId, doc_id: DocId) -> Result<Option<Vec<u8>>>;
}

/// How a source's local doc-ids become output doc-ids.
#[derive(Debug, Clone)]
enum SourceRemap {
    /// `base + local`.
    Rebased,
    /// Indexed by local doc-id.
    Local(DocIdRemap),
    /// Indexed by global doc-id, `base + local`.
    Global(DocIdRemap),
}

/// One input segment of a merge.
#[derive(Debug, Clone)]
pub struct MergeSource {
    name: String,
    reader: Arc<SegmentDataReader>,
    base_doc_id: DocId,
    remap: SourceRemap,
    external: Option<Arc<dyn ExternalEmbeddingSource>>,
}

impl MergeSource {
    /// Without a remap, local doc-id `d` becomes `base_doc_id + d`.
    pub fn new(name: impl Into<String>, reader: Arc<SegmentDataReader>, base_doc_id: DocId) -> Self {
        MergeSource {
            name: name.into(),
            reader,
            base_doc_id,
            remap: SourceRemap::Rebased,
            external: None,
        }
    }

    /// Remap indexed by this segment's local doc-ids.
    pub fn with_remap(mut self, remap: DocIdRemap) -> Self {
        self.remap = SourceRemap::Local(remap);
        self
    }

    /// Remap indexed by global doc-ids, shared by every source of a merge.
    pub fn with_global_remap(mut self, remap: DocIdRemap) -> Self {
        self.remap = SourceRemap::Global(remap);
        self
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalEmbeddingSource>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reader(&self) -> &Arc<SegmentDataReader> {
        &self.reader
    }

    /// Output doc-id of a local doc-id, or `INVALID_DOC_ID` when dropped.
    pub fn map_doc_id(&self, local: DocId) -> DocId {
        match &self.remap {
            SourceRemap::Rebased => self.base_doc_id.checked_add(local).unwrap_or(INVALID_DOC_ID),
            SourceRemap::Local(remap) => remap.get(local),
            SourceRemap::Global(remap) => match self.base_doc_id.checked_add(local) {
                Some(global) => remap.get(global),
                None => INVALID_DOC_ID,
            },
        }
    }
}

/// The sub-indices merged in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTask {
    pub sub_index_ids: Vec<SubIndexId>,
    /// Collapse every listed sub-index into this one.
    #[serde(default)]
    pub compact_into: Option<SubIndexId>,
}

impl MergeTask {
    pub fn new(sub_index_ids: Vec<SubIndexId>) -> Self {
        MergeTask {
            sub_index_ids,
            compact_into: None,
        }
    }

    pub fn compact(sub_index_ids: Vec<SubIndexId>, target: SubIndexId) -> Self {
        MergeTask {
            sub_index_ids,
            compact_into: Some(target),
        }
    }

    /// Output sub-index of a source sub-index.
    pub fn target_of(&self, sub_index_id: SubIndexId) -> SubIndexId {
        self.compact_into.unwrap_or(sub_index_id)
    }

    pub fn output_sub_index_ids(&self) -> Vec<SubIndexId> {
        let mut ids: Vec<SubIndexId> = self
            .sub_index_ids
            .iter()
            .map(|&id| self.target_of(id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Counters of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub segments_merged: u64,
    /// Documents in the output, counted once per sub-index.
    pub docs_merged: u64,
    /// Input documents whose doc-id remapped to `INVALID_DOC_ID`.
    pub docs_dropped: u64,
    pub from_embedding_stream: u64,
    pub from_index_blob: u64,
    pub from_external_source: u64,
    pub elapsed_millis: u64,
    pub output_bytes: u64,
}

impl MergeStats {
    fn absorb(&mut self, other: &MergeStats) {
        self.segments_merged = self.segments_merged.max(other.segments_merged);
        self.docs_merged += other.docs_merged;
        self.docs_dropped += other.docs_dropped;
        self.from_embedding_stream += other.from_embedding_stream;
        self.from_index_blob += other.from_index_blob;
        self.from_external_source += other.from_external_source;
        self.output_bytes += other.output_bytes;
    }
}

/// Result of a merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub meta: SegmentMeta,
    pub stats: MergeStats,
}

/// Where the embeddings of one sub-index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extraction {
    EmbeddingStream,
    IndexBlob,
    External,
}

#[derive(Debug)]
pub struct SegmentMerger {
    config: Arc<IndexConfig>,
    registry: Arc<EngineRegistry>,
}

impl SegmentMerger {
    pub fn new(config: Arc<IndexConfig>, registry: Arc<EngineRegistry>) -> Self {
        SegmentMerger { config, registry }
    }

    /// Merge the task's sub-indices of every source into `output`.
    pub fn merge(
        &self,
        sources: &[MergeSource],
        task: &MergeTask,
        output: Arc<dyn Storage>,
    ) -> Result<MergeOutcome> {
        let started = Instant::now();
        self.check_task(sources, task)?;

        let mut builder = NormalSegmentBuilder::new(Arc::clone(&self.config), Arc::clone(&self.registry))?;
        builder.set_merged(true);
        let mut stats = MergeStats {
            segments_merged: sources.len() as u64,
            ..Default::default()
        };

        for source in sources {
            for &sub_index_id in &task.sub_index_ids {
                if !source.reader.meta().sub_indices.contains_key(&sub_index_id) {
                    continue;
                }
                self.extract(
                    source,
                    sub_index_id,
                    task.target_of(sub_index_id),
                    &mut builder,
                    &mut stats,
                )?;
            }
        }

        let meta = builder.dump(output, None)?;
        stats.docs_merged = meta.doc_count;
        stats.output_bytes = meta.total_bytes;
        stats.elapsed_millis = started.elapsed().as_millis() as u64;
        info!(
            segments = stats.segments_merged,
            sub_indices = ?task.sub_index_ids,
            docs_merged = stats.docs_merged,
            docs_dropped = stats.docs_dropped,
            elapsed_ms = stats.elapsed_millis,
            "segments merged"
        );
        Ok(MergeOutcome { meta, stats })
    }

    /// Run one merge per task into `instance_<n>` directories of `output`.
    ///
    /// Tasks must produce disjoint output sub-indices. The parallel-merge
    /// marker is written only after every instance is complete.
    pub fn merge_parallel(
        &self,
        sources: &[MergeSource],
        tasks: &[MergeTask],
        output: Arc<dyn Storage>,
    ) -> Result<MergeOutcome> {
        let started = Instant::now();
        if tasks.is_empty() {
            return Err(VecSegError::invalid_operation("parallel merge has no tasks"));
        }
        let mut seen = AHashSet::new();
        for task in tasks {
            for id in task.output_sub_index_ids() {
                if !seen.insert(id) {
                    return Err(VecSegError::invalid_operation(format!(
                        "sub-index {id} is produced by several merge tasks"
                    )));
                }
            }
        }

        let outcomes = tasks
            .par_iter()
            .enumerate()
            .map(|(instance, task)| {
                self.merge(sources, task, storage::sub_storage(&output, &instance_dir(instance)))
            })
            .collect::<Result<Vec<_>>>()?;

        ParallelMergeMeta::new(tasks.len()).write(output.as_ref())?;

        let metas: Vec<SegmentMeta> = outcomes.iter().map(|o| o.meta.clone()).collect();
        let meta = SegmentMeta::union(&metas)?;
        let mut stats = MergeStats::default();
        for outcome in &outcomes {
            stats.absorb(&outcome.stats);
        }
        stats.elapsed_millis = started.elapsed().as_millis() as u64;
        info!(
            instances = tasks.len(),
            docs_merged = stats.docs_merged,
            "parallel merge finished"
        );
        Ok(MergeOutcome { meta, stats })
    }

    fn check_task(&self, sources: &[MergeSource], task: &MergeTask) -> Result<()> {
        if task.sub_index_ids.is_empty() {
            return Err(VecSegError::invalid_operation("merge task lists no sub-index"));
        }
        for &sub_index_id in &task.sub_index_ids {
            let present = sources
                .iter()
                .any(|s| s.reader.meta().sub_indices.contains_key(&sub_index_id));
            if !present {
                return Err(VecSegError::consistency(format!(
                    "merge task references sub-index {sub_index_id} which no input segment holds"
                )));
            }
        }
        for source in sources {
            let meta = source.reader.meta();
            if meta.dimension != self.config.dimension || meta.element_type != self.config.element_type {
                return Err(VecSegError::config(format!(
                    "segment {} stores dimension {} {} embeddings, the merge expects dimension {} {}",
                    source.name,
                    meta.dimension,
                    meta.element_type.name(),
                    self.config.dimension,
                    self.config.element_type.name()
                )));
            }
        }
        Ok(())
    }

    fn extract(
        &self,
        source: &MergeSource,
        sub_index_id: SubIndexId,
        target: SubIndexId,
        builder: &mut NormalSegmentBuilder,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let records = source.reader.read_primary_keys(sub_index_id)?;
        let mut pk_of: AHashMap<DocId, PrimaryKey> = AHashMap::with_capacity(records.len());
        for (pk, doc_id) in records {
            if pk_of.insert(doc_id, pk).is_some() {
                return Err(VecSegError::corruption(format!(
                    "segment {} sub-index {sub_index_id}: doc {doc_id} has several primary keys",
                    source.name
                )));
            }
        }

        let mut visited = 0usize;
        let mut dropped = 0u64;
        let mut visit = |local: DocId, embedding: &[u8]| -> Result<()> {
            visited += 1;
            let doc_id = source.map_doc_id(local);
            if doc_id == INVALID_DOC_ID {
                dropped += 1;
                return Ok(());
            }
            let pk = pk_of.get(&local).copied().ok_or_else(|| {
                VecSegError::consistency(format!(
                    "segment {} sub-index {sub_index_id}: doc {local} has an embedding but no primary key",
                    source.name
                ))
            })?;
            builder.add_extracted(pk, doc_id, target, embedding)
        };

        let extraction = if source.reader.has_embeddings(sub_index_id) {
            source.reader.for_each_embedding(sub_index_id, &mut visit)?;
            Extraction::EmbeddingStream
        } else {
            match self.scan_index_blob(source, sub_index_id, &mut visit) {
                Ok(()) => Extraction::IndexBlob,
                Err(VecSegError::Unsupported(reason)) => {
                    let external = source.external.as_ref().ok_or_else(|| {
                        VecSegError::unsupported(format!(
                            "segment {} sub-index {sub_index_id} has no embedding stream and its index cannot be scanned: {reason}",
                            source.name
                        ))
                    })?;
                    let mut locals: Vec<DocId> = pk_of.keys().copied().collect();
                    locals.sort_unstable();
                    for local in locals {
                        let embedding = external.embedding(sub_index_id, local)?.ok_or_else(|| {
                            VecSegError::consistency(format!(
                                "segment {} sub-index {sub_index_id}: external store has no embedding for doc {local}",
                                source.name
                            ))
                        })?;
                        visit(local, &embedding)?;
                    }
                    Extraction::External
                }
                Err(e) => return Err(e),
            }
        };

        if visited != pk_of.len() {
            return Err(VecSegError::consistency(format!(
                "segment {} sub-index {sub_index_id}: {visited} embeddings extracted for {} primary keys",
                source.name,
                pk_of.len()
            )));
        }
        let kept = (visited as u64) - dropped;
        stats.docs_dropped += dropped;
        match extraction {
            Extraction::EmbeddingStream => stats.from_embedding_stream += kept,
            Extraction::IndexBlob => stats.from_index_blob += kept,
            Extraction::External => stats.from_external_source += kept,
        }
        debug!(
            segment = %source.name,
            sub_index_id,
            target,
            kept,
            dropped,
            method = ?extraction,
            "sub-index extracted"
        );
        Ok(())
    }

    fn scan_index_blob(
        &self,
        source: &MergeSource,
        sub_index_id: SubIndexId,
        visit: &mut dyn FnMut(DocId, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let sub = source.reader.meta().sub_index(sub_index_id)?;
        let engine = self.registry.get_by_name(&sub.searcher_name)?;
        let config = EngineConfig {
            dimension: self.config.dimension,
            element_type: self.config.element_type,
            metric: self.config.distance_metric,
            params: self.config.search_params()?,
        };
        let blob = source.reader.read_index_blob(sub_index_id)?;
        let handle = engine.create_searcher(&config, &blob)?;
        handle.scan_embeddings(visit)
    }
}
