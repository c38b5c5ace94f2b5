//! Searching a single segment.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::trace;

use crate::error::{Result, VecSegError};
use crate::search::context::{SearchContextCache, WorkerId};
use crate::search::filter::{DocFilter, DocPredicate};
use crate::search::query::SubIndexQuery;
use crate::search::result::ResultHolder;
use crate::segment::Segment;
use crate::vector::core::doc::MatchItem;
use crate::vector::engine::{SearchContext, SearchStats};

/// Exclusive use of a cached context for one query.
///
/// Installs top-k and the doc filter on creation and clears both the filter
/// and per-query state when dropped, including on early return.
struct FilterScope<'a> {
    context: MutexGuard<'a, Box<dyn SearchContext>>,
}

impl<'a> FilterScope<'a> {
    fn install(
        mut context: MutexGuard<'a, Box<dyn SearchContext>>,
        topk: usize,
        filter: DocFilter,
    ) -> Self {
        context.reset();
        context.set_topk(topk);
        context.set_filter(filter);
        FilterScope { context }
    }
}

impl Deref for FilterScope<'_> {
    type Target = dyn SearchContext;

    fn deref(&self) -> &Self::Target {
        &**self.context
    }
}

impl DerefMut for FilterScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.context
    }
}

impl Drop for FilterScope<'_> {
    fn drop(&mut self) {
        self.context.reset_filter();
        self.context.reset();
    }
}

/// Runs sub-index queries against one segment.
#[derive(Debug, Clone)]
pub struct SegmentSearcher {
    segment: Arc<Segment>,
    contexts: Arc<SearchContextCache>,
}

impl SegmentSearcher {
    pub fn new(segment: Arc<Segment>, contexts: Arc<SearchContextCache>) -> Self {
        SegmentSearcher { segment, contexts }
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Search one sub-index and append global-doc-id results to `holder`.
    ///
    /// A segment without the sub-index contributes nothing.
    pub fn search(
        &self,
        worker: WorkerId,
        query: &SubIndexQuery,
        filter: Option<Arc<dyn DocPredicate>>,
        bruteforce: bool,
        holder: &mut ResultHolder,
    ) -> Result<SearchStats> {
        let Some(segment_handle) = self.segment.handle(query.sub_index_id) else {
            return Ok(SearchStats::default());
        };
        let handle = segment_handle.as_handle();

        let engine_config = self.segment.engine_config();
        let mut encoded = Vec::with_capacity(query.embeddings.len());
        for embedding in &query.embeddings {
            embedding.check(engine_config.dimension, engine_config.element_type)?;
            encoded.push(embedding.to_bytes());
        }
        let queries: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();

        let params = query.param_overrides()?;
        let identity = self.segment.searcher_identity(query.sub_index_id);
        let shared = self
            .contexts
            .get_or_create(worker, &identity, &params, handle)?;

        let base_doc_id = self.segment.base_doc_id();
        let doc_filter = DocFilter::compose(Arc::clone(self.segment.deletions()), base_doc_id, filter);
        let mut context = FilterScope::install(shared.lock(), query.topk, doc_filter);

        if bruteforce {
            handle.search_bruteforce(&mut *context, &queries)?;
        } else {
            handle.search(&mut *context, &queries)?;
        }

        let metric = engine_config.metric;
        let normalize = metric.needs_score_normalization();
        for hits in context.results() {
            for hit in hits {
                let score = if normalize {
                    metric.normalize_score(hit.score)
                } else {
                    hit.score
                };
                let doc_id = base_doc_id.checked_add(hit.doc_id).ok_or_else(|| {
                    VecSegError::consistency(format!(
                        "doc {} of segment {} overflows from base doc-id {base_doc_id}",
                        hit.doc_id,
                        self.segment.name()
                    ))
                })?;
                holder.append(MatchItem::new(doc_id, score));
            }
        }

        let stats = context.stats();
        holder.add_stats(stats);
        trace!(
            searcher = %identity,
            bruteforce,
            filtered = stats.filtered_count,
            evaluated = stats.dist_calc_count,
            "segment searched"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filter::ExcludeDocIds;
    use crate::segment::builder::{BuildRecord, NormalSegmentBuilder};
    use crate::segment::deletion::DeletionMap;
    use crate::segment::NormalSegment;
    use crate::storage::Storage;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
    use crate::vector::config::IndexConfig;
    use crate::vector::core::distance::DistanceMetric;
    use crate::vector::core::doc::DocId;
    use crate::vector::core::embedding::Embedding;
    use crate::vector::engine::registry::EngineRegistry;

    fn segment(metric: DistanceMetric, base: u32) -> Arc<Segment> {
        let config = Arc::new(
            IndexConfig::builder()
                .dimension(2)
                .distance_metric(metric)
                .build()
                .unwrap(),
        );
        let registry = Arc::new(EngineRegistry::with_defaults());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let mut builder = NormalSegmentBuilder::new(Arc::clone(&config), Arc::clone(&registry)).unwrap();
        let points = [[0.0, 0.0], [3.0, 4.0], [6.0, 8.0]];
        for (doc, point) in points.iter().enumerate() {
            builder
                .build(&BuildRecord::new(doc as u64, doc as u32, vec![1], point.to_vec()))
                .unwrap();
        }
        builder.dump(Arc::clone(&storage), None).unwrap();
        Arc::new(Segment::Normal(
            NormalSegment::open("seg", storage, &config, &registry, base, Arc::new(DeletionMap::new()))
                .unwrap(),
        ))
    }

    fn query(topk: usize) -> SubIndexQuery {
        SubIndexQuery::new(1, vec![Embedding::F32(vec![0.0, 0.0])], topk)
    }

    #[test]
    fn test_results_are_rebased_and_normalized() {
        let searcher = SegmentSearcher::new(segment(DistanceMetric::Euclidean, 10), Arc::default());
        let mut holder = ResultHolder::for_metric(DistanceMetric::Euclidean);
        searcher
            .search(WorkerId(0), &query(2), None, false, &mut holder)
            .unwrap();
        assert_eq!(
            holder.topk_match_items(2),
            vec![MatchItem::new(10, 0.0), MatchItem::new(11, 5.0)]
        );
    }

    #[test]
    fn test_deletions_and_custom_filter_use_global_ids() {
        let segment = segment(DistanceMetric::SquaredEuclidean, 10);
        segment.delete(10);
        let searcher = SegmentSearcher::new(segment, Arc::default());
        let mut holder = ResultHolder::for_metric(DistanceMetric::SquaredEuclidean);
        let stats = searcher
            .search(
                WorkerId(0),
                &query(3),
                Some(Arc::new(ExcludeDocIds::new([11]))),
                false,
                &mut holder,
            )
            .unwrap();
        assert_eq!(holder.topk_match_items(3), vec![MatchItem::new(12, 100.0)]);
        assert_eq!(stats.filtered_count, 2);
    }

    #[test]
    fn test_context_is_reused_and_cleared() {
        let contexts = Arc::new(SearchContextCache::new());
        let searcher = SegmentSearcher::new(segment(DistanceMetric::SquaredEuclidean, 0), Arc::clone(&contexts));
        for _ in 0..3 {
            let mut holder = ResultHolder::for_metric(DistanceMetric::SquaredEuclidean);
            searcher
                .search(WorkerId(0), &query(1), Some(Arc::new(ExcludeDocIds::new([0]))), false, &mut holder)
                .unwrap();
            assert_eq!(holder.topk_match_items(1), vec![MatchItem::new(1, 25.0)]);
        }
        assert_eq!(contexts.len(), 1);

        let shared = contexts
            .get_or_create(
                WorkerId(0),
                "seg/1",
                &Default::default(),
                searcher.segment().handle(1).unwrap().as_handle(),
            )
            .unwrap();
        let context = shared.lock();
        assert!(context.filter().is_none());
        assert!(context.results().is_empty());
    }

    #[test]
    fn test_missing_sub_index_is_empty() {
        let searcher = SegmentSearcher::new(segment(DistanceMetric::InnerProduct, 0), Arc::default());
        let mut holder = ResultHolder::for_metric(DistanceMetric::InnerProduct);
        let mut missing = query(3);
        missing.sub_index_id = 42;
        searcher
            .search(WorkerId(0), &missing, None, false, &mut holder)
            .unwrap();
        assert!(holder.is_empty());
    }

    #[test]
    fn test_wrong_dimension_rejected() {
        let searcher = SegmentSearcher::new(segment(DistanceMetric::InnerProduct, 0), Arc::default());
        let mut holder = ResultHolder::for_metric(DistanceMetric::InnerProduct);
        let bad = SubIndexQuery::new(1, vec![Embedding::F32(vec![1.0])], 3);
        assert!(
            searcher
                .search(WorkerId(0), &bad, None, false, &mut holder)
                .is_err()
        );
    }

    #[test]
    fn test_doc_id_past_global_range_rejected() {
        let searcher = SegmentSearcher::new(
            segment(DistanceMetric::SquaredEuclidean, DocId::MAX - 1),
            Arc::default(),
        );
        let mut holder = ResultHolder::for_metric(DistanceMetric::SquaredEuclidean);
        let err = searcher
            .search(WorkerId(0), &query(3), None, false, &mut holder)
            .unwrap_err();
        assert!(matches!(err, VecSegError::Consistency(_)));
    }
}
