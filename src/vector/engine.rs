//! The ANN engine capability consumed by builders, segments and searchers.
//!
//! Index algorithms are external to the segment machinery. An
//! [`AnnIndexEngine`] turns embeddings into an opaque index blob
//! ([`IndexBuilder`]), opens a blob for searching ([`IndexHandle`]) and runs a
//! mutable in-memory index for realtime segments ([`Streamer`]). Nothing here
//! looks inside a blob.
//!
//! # Module Structure
//!
//! - `registry`: closed set of algorithm kinds and the engine table
//! - `params`: parameter text and size-based tuning
//! - `linear`: the built-in exact-scan engine

use std::any::Any;
use std::fmt::Debug;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::search::filter::DocFilter;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::doc::{DocId, MatchItem};
use crate::vector::core::embedding::ElementType;
use crate::vector::engine::params::EngineParams;
use crate::vector::engine::registry::AlgorithmKind;

pub mod linear;
pub mod params;
pub mod registry;

/// Everything an engine needs to interpret embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub dimension: usize,
    pub element_type: ElementType,
    pub metric: DistanceMetric,
    pub params: EngineParams,
}

impl EngineConfig {
    pub fn embedding_bytes(&self) -> usize {
        self.element_type.embedding_bytes(self.dimension)
    }

    pub fn with_params(&self, params: EngineParams) -> Self {
        EngineConfig {
            params,
            ..self.clone()
        }
    }
}

/// Build statistics reported by an [`IndexBuilder`] and kept in segment metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub trained_count: u64,
    pub built_count: u64,
    pub discarded_count: u64,
    pub train_millis: u64,
    pub build_millis: u64,
    pub dumped_bytes: u64,
}

/// Counters accumulated by one search call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Candidates rejected by the installed filter.
    pub filtered_count: u64,
    /// Distance evaluations performed.
    pub dist_calc_count: u64,
}

/// A source of `(doc-id, raw embedding)` pairs fed to an index builder.
///
/// The returned slice borrows the source, so pairs are consumed one at a
/// time. Multi-pass sources can be rewound with [`EmbeddingSource::rewind`].
pub trait EmbeddingSource {
    fn next_embedding(&mut self) -> Option<(DocId, &[u8])>;

    /// Restart from the first pair. Single-pass sources fail.
    fn rewind(&mut self) -> Result<()>;

    /// Number of pairs in one full pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory, rewindable [`EmbeddingSource`].
#[derive(Debug, Clone, Default)]
pub struct OwnedEmbeddings {
    items: Vec<(DocId, Vec<u8>)>,
    position: usize,
}

impl OwnedEmbeddings {
    pub fn new(items: Vec<(DocId, Vec<u8>)>) -> Self {
        OwnedEmbeddings { items, position: 0 }
    }

    pub fn push(&mut self, doc_id: DocId, embedding: Vec<u8>) {
        self.items.push((doc_id, embedding));
    }
}

impl EmbeddingSource for OwnedEmbeddings {
    fn next_embedding(&mut self) -> Option<(DocId, &[u8])> {
        let (doc_id, embedding) = self.items.get(self.position)?;
        self.position += 1;
        Some((*doc_id, embedding.as_slice()))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Builds one opaque index blob from embeddings.
pub trait IndexBuilder: Send {
    /// Whether `train` must see the data before `build`.
    fn needs_training(&self) -> bool {
        false
    }

    fn train(&mut self, source: &mut dyn EmbeddingSource) -> Result<()>;

    fn build(&mut self, source: &mut dyn EmbeddingSource) -> Result<()>;

    /// Write the built blob and return the number of bytes written.
    fn dump(&mut self, out: &mut dyn Write) -> Result<u64>;

    fn stats(&self) -> BuildStats;
}

/// Reusable per-searcher query state.
///
/// A context belongs to exactly one searcher identity and one parameter set.
/// [`SearchContext::reset`] clears per-query state but keeps parameters.
pub trait SearchContext: Send + Debug {
    fn topk(&self) -> usize;

    fn set_topk(&mut self, topk: usize);

    fn filter(&self) -> &DocFilter;

    fn set_filter(&mut self, filter: DocFilter);

    fn reset_filter(&mut self);

    fn params(&self) -> &EngineParams;

    fn update_params(&mut self, params: &EngineParams) -> Result<()>;

    /// Results of the last search, one list per query embedding, best first.
    fn results(&self) -> &[Vec<MatchItem>];

    fn set_results(&mut self, results: Vec<Vec<MatchItem>>);

    fn stats(&self) -> SearchStats;

    fn stats_mut(&mut self) -> &mut SearchStats;

    /// Clear results and counters.
    fn reset(&mut self);

    /// Engine-private state for engines that keep scratch buffers.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The context every built-in engine uses.
#[derive(Debug, Default)]
pub struct BasicSearchContext {
    topk: usize,
    filter: DocFilter,
    params: EngineParams,
    results: Vec<Vec<MatchItem>>,
    stats: SearchStats,
}

impl BasicSearchContext {
    pub fn new(params: EngineParams) -> Self {
        BasicSearchContext {
            topk: 10,
            params,
            ..Default::default()
        }
    }
}

impl SearchContext for BasicSearchContext {
    fn topk(&self) -> usize {
        self.topk
    }

    fn set_topk(&mut self, topk: usize) {
        self.topk = topk;
    }

    fn filter(&self) -> &DocFilter {
        &self.filter
    }

    fn set_filter(&mut self, filter: DocFilter) {
        self.filter = filter;
    }

    fn reset_filter(&mut self) {
        self.filter = DocFilter::None;
    }

    fn params(&self) -> &EngineParams {
        &self.params
    }

    fn update_params(&mut self, params: &EngineParams) -> Result<()> {
        self.params = self.params.merged(params);
        Ok(())
    }

    fn results(&self) -> &[Vec<MatchItem>] {
        &self.results
    }

    fn set_results(&mut self, results: Vec<Vec<MatchItem>>) {
        self.results = results;
    }

    fn stats(&self) -> SearchStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut SearchStats {
        &mut self.stats
    }

    fn reset(&mut self) {
        self.results.clear();
        self.stats = SearchStats::default();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A searchable index: an opened blob or a live streamer.
pub trait IndexHandle: Send + Sync + Debug {
    fn create_context(&self) -> Result<Box<dyn SearchContext>>;

    /// Approximate top-k search for each query embedding.
    fn search(&self, context: &mut dyn SearchContext, queries: &[&[u8]]) -> Result<()>;

    /// Exact top-k search for each query embedding.
    fn search_bruteforce(&self, context: &mut dyn SearchContext, queries: &[&[u8]])
    -> Result<()>;

    /// Number of indexed documents.
    fn doc_count(&self) -> usize;

    /// Visit every indexed `(doc-id, raw embedding)` pair in doc-id order.
    fn scan_embeddings(&self, visit: &mut dyn FnMut(DocId, &[u8]) -> Result<()>) -> Result<()>;
}

/// Initial state of a new streamer.
#[derive(Debug, Clone, Copy)]
pub enum StreamerResource<'a> {
    /// Start empty.
    Cold,
    /// Start from a normal-segment blob built by a compatible algorithm,
    /// holding every document of that blob.
    WarmStart(&'a [u8]),
}

/// A mutable index supporting per-document add and remove.
pub trait Streamer: IndexHandle {
    /// Add or replace the embedding of `doc_id`.
    fn add(&self, doc_id: DocId, embedding: &[u8]) -> Result<()>;

    /// Remove `doc_id`. Removing an absent document is a no-op.
    fn remove(&self, doc_id: DocId) -> Result<()>;

    /// Snapshot the current state as a blob without closing the streamer.
    fn dump(&self, out: &mut dyn Write) -> Result<u64>;

    /// Release resources held for removed documents.
    fn cleanup(&self) -> Result<()>;

    fn as_handle(&self) -> &dyn IndexHandle;
}

/// One ANN algorithm implementation.
pub trait AnnIndexEngine: Send + Sync + Debug {
    fn kind(&self) -> AlgorithmKind;

    fn create_builder(&self, config: &EngineConfig, doc_count: usize)
    -> Result<Box<dyn IndexBuilder>>;

    /// Open a blob previously written by a builder of the same kind.
    fn create_searcher(&self, config: &EngineConfig, blob: &[u8]) -> Result<Box<dyn IndexHandle>>;

    fn create_streamer(
        &self,
        config: &EngineConfig,
        resource: StreamerResource<'_>,
    ) -> Result<Box<dyn Streamer>>;

    fn supports_streaming(&self) -> bool {
        true
    }
}
