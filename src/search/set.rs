//! Searching every segment of an index.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::search::context::{SearchContextCache, WorkerId};
use crate::search::query::{SubIndexQuery, VectorQuery};
use crate::search::result::ResultHolder;
use crate::search::searcher::SegmentSearcher;
use crate::segment::Segment;
use crate::vector::config::IndexConfig;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::doc::{DocId, MatchItem, SubIndexId};
use crate::vector::core::embedding::ElementType;
use crate::vector::engine::SearchStats;

/// Merged answer to one [`SubIndexQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubIndexResult {
    pub sub_index_id: SubIndexId,
    /// Best distinct documents by global doc-id, ascending.
    pub items: Vec<MatchItem>,
    pub stats: SearchStats,
    /// Segments whose search failed and were left out.
    pub failed_segments: Vec<String>,
}

/// The searchable segments of one logical index.
#[derive(Debug)]
pub struct SegmentSet {
    searchers: RwLock<Vec<SegmentSearcher>>,
    contexts: Arc<SearchContextCache>,
    metric: DistanceMetric,
    dimension: usize,
    element_type: ElementType,
}

impl SegmentSet {
    pub fn new(config: &IndexConfig) -> Self {
        SegmentSet {
            searchers: RwLock::new(Vec::new()),
            contexts: Arc::new(SearchContextCache::new()),
            metric: config.distance_metric,
            dimension: config.dimension,
            element_type: config.element_type,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn contexts(&self) -> &Arc<SearchContextCache> {
        &self.contexts
    }

    pub fn add_segment(&self, segment: Arc<Segment>) {
        debug!(
            segment = segment.name(),
            kind = ?segment.kind(),
            base_doc_id = segment.base_doc_id(),
            "segment added to search set"
        );
        self.searchers
            .write()
            .push(SegmentSearcher::new(segment, Arc::clone(&self.contexts)));
    }

    /// Remove a segment by name and drop its cached contexts.
    pub fn remove_segment(&self, name: &str) -> Option<Arc<Segment>> {
        let mut searchers = self.searchers.write();
        let position = searchers.iter().position(|s| s.segment().name() == name)?;
        let removed = searchers.remove(position);
        self.contexts.evict(&format!("{name}/"));
        Some(Arc::clone(removed.segment()))
    }

    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.searchers
            .read()
            .iter()
            .map(|s| Arc::clone(s.segment()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.searchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.searchers.read().is_empty()
    }

    /// Lowest base doc-id of any realtime segment. Every global doc-id at
    /// or above it was produced by realtime ingestion.
    pub fn realtime_base_doc_id(&self) -> Option<DocId> {
        self.searchers
            .read()
            .iter()
            .filter(|s| s.segment().is_realtime())
            .map(|s| s.segment().base_doc_id())
            .min()
    }

    /// Search every segment.
    pub fn search(&self, worker: WorkerId, query: &VectorQuery) -> Result<Vec<SubIndexResult>> {
        self.search_where(worker, query, |_| true)
    }

    /// Search realtime segments only.
    pub fn search_realtime(
        &self,
        worker: WorkerId,
        query: &VectorQuery,
    ) -> Result<Vec<SubIndexResult>> {
        self.search_where(worker, query, Segment::is_realtime)
    }

    fn search_where<P>(
        &self,
        worker: WorkerId,
        query: &VectorQuery,
        include: P,
    ) -> Result<Vec<SubIndexResult>>
    where
        P: Fn(&Segment) -> bool,
    {
        for item in &query.items {
            self.check_query(item)?;
        }
        let searchers: Vec<SegmentSearcher> = self
            .searchers
            .read()
            .iter()
            .filter(|s| include(s.segment().as_ref()))
            .cloned()
            .collect();

        let mut results = Vec::with_capacity(query.items.len());
        for item in &query.items {
            let mut holder =
                ResultHolder::for_metric(self.metric).with_threshold(item.score_threshold);
            let mut failed_segments = Vec::new();
            for searcher in &searchers {
                let outcome = searcher.search(
                    worker,
                    item,
                    query.filter.clone(),
                    query.bruteforce,
                    &mut holder,
                );
                if let Err(e) = outcome {
                    let name = searcher.segment().name().to_string();
                    warn!(
                        segment = %name,
                        sub_index_id = item.sub_index_id,
                        error = %e,
                        "segment search failed, excluding it from results"
                    );
                    failed_segments.push(name);
                }
            }
            results.push(SubIndexResult {
                sub_index_id: item.sub_index_id,
                items: holder.topk_match_items(item.topk),
                stats: holder.stats(),
                failed_segments,
            });
        }
        Ok(results)
    }

    fn check_query(&self, item: &SubIndexQuery) -> Result<()> {
        for embedding in &item.embeddings {
            embedding.check(self.dimension, self.element_type)?;
        }
        item.param_overrides()?;
        Ok(())
    }
}
