//! Top-k aggregation across segments.

use crate::vector::core::distance::{DistanceMetric, ScoreOrder};
use crate::vector::core::doc::MatchItem;
use crate::vector::engine::SearchStats;

/// Collects candidates from every segment of one sub-index query.
///
/// Append order does not matter: [`ResultHolder::topk_match_items`] first
/// collapses duplicate doc-ids to their better score, then keeps the best
/// `k`, and finally returns them in ascending doc-id order.
#[derive(Debug, Clone)]
pub struct ResultHolder {
    order: ScoreOrder,
    threshold: Option<f32>,
    items: Vec<MatchItem>,
    stats: SearchStats,
}

impl ResultHolder {
    pub fn new(order: ScoreOrder) -> Self {
        ResultHolder {
            order,
            threshold: None,
            items: Vec::new(),
            stats: SearchStats::default(),
        }
    }

    pub fn for_metric(metric: DistanceMetric) -> Self {
        ResultHolder::new(metric.order())
    }

    /// Drop candidates whose score is not strictly better than `threshold`.
    pub fn with_threshold(mut self, threshold: Option<f32>) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn order(&self) -> ScoreOrder {
        self.order
    }

    /// Add one candidate. Returns `false` if the threshold rejected it.
    #[inline]
    pub fn append(&mut self, item: MatchItem) -> bool {
        if let Some(threshold) = self.threshold
            && !self.order.is_better(item.score, threshold)
        {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn append_all<I: IntoIterator<Item = MatchItem>>(&mut self, items: I) {
        for item in items {
            self.append(item);
        }
    }

    pub fn add_stats(&mut self, stats: SearchStats) {
        self.stats.filtered_count += stats.filtered_count;
        self.stats.dist_calc_count += stats.dist_calc_count;
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Candidates appended so far, duplicates included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The best `k` distinct documents, sorted by doc-id.
    pub fn topk_match_items(&self, k: usize) -> Vec<MatchItem> {
        let order = self.order;
        let mut items = self.items.clone();

        items.sort_by(|a, b| {
            a.doc_id
                .cmp(&b.doc_id)
                .then_with(|| order.compare(a.score, b.score))
        });
        items.dedup_by_key(|item| item.doc_id);

        items.sort_by(|a, b| {
            order
                .compare(a.score, b.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        items.truncate(k);

        items.sort_by_key(|item| item.doc_id);
        items
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.stats = SearchStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(u32, f32)]) -> Vec<MatchItem> {
        pairs.iter().map(|&(d, s)| MatchItem::new(d, s)).collect()
    }

    #[test]
    fn test_inner_product_dedup_keeps_max() {
        let mut holder = ResultHolder::for_metric(DistanceMetric::InnerProduct);
        holder.append_all(items(&[(1, 1.0), (2, 2.0), (1, 2.0)]));
        assert_eq!(holder.topk_match_items(10), items(&[(1, 2.0), (2, 2.0)]));
    }

    #[test]
    fn test_distance_dedup_keeps_min() {
        let mut holder = ResultHolder::for_metric(DistanceMetric::SquaredEuclidean);
        holder.append_all(items(&[(4, 0.5), (4, 0.2), (3, 0.9)]));
        assert_eq!(holder.topk_match_items(10), items(&[(3, 0.9), (4, 0.2)]));
    }

    #[test]
    fn test_truncate_then_sort_by_doc_id() {
        let mut holder = ResultHolder::for_metric(DistanceMetric::SquaredEuclidean);
        holder.append_all(items(&[(9, 0.1), (1, 0.8), (5, 0.3), (7, 0.2)]));
        assert_eq!(holder.topk_match_items(2), items(&[(7, 0.2), (9, 0.1)]));
        assert!(holder.topk_match_items(0).is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut holder =
            ResultHolder::for_metric(DistanceMetric::InnerProduct).with_threshold(Some(1.0));
        assert!(!holder.append(MatchItem::new(1, 1.0)));
        assert!(!holder.append(MatchItem::new(2, 0.5)));
        assert!(holder.append(MatchItem::new(3, 1.5)));
        assert_eq!(holder.len(), 1);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut holder = ResultHolder::for_metric(DistanceMetric::Cosine);
        holder.add_stats(SearchStats {
            filtered_count: 2,
            dist_calc_count: 10,
        });
        holder.add_stats(SearchStats {
            filtered_count: 1,
            dist_calc_count: 5,
        });
        assert_eq!(holder.stats().filtered_count, 3);
        assert_eq!(holder.stats().dist_calc_count, 15);
        holder.clear();
        assert_eq!(holder.stats(), SearchStats::default());
    }
}
