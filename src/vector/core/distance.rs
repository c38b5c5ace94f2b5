//! Distance metrics and score ordering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSegError};
use crate::util::simd;

/// Which direction of a score is preferable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreOrder {
    /// Distances: the smallest score is the best match.
    SmallerIsBetter,
    /// Similarities: the largest score is the best match.
    LargerIsBetter,
}

impl ScoreOrder {
    /// Whether `candidate` is strictly better than `reference`.
    pub fn is_better(self, candidate: f32, reference: f32) -> bool {
        match self {
            ScoreOrder::SmallerIsBetter => candidate < reference,
            ScoreOrder::LargerIsBetter => candidate > reference,
        }
    }

    /// Pick the better of two scores.
    pub fn better(self, a: f32, b: f32) -> f32 {
        if self.is_better(b, a) { b } else { a }
    }

    /// Ordering that sorts the best score first.
    pub fn compare(self, a: f32, b: f32) -> Ordering {
        match self {
            ScoreOrder::SmallerIsBetter => a.total_cmp(&b),
            ScoreOrder::LargerIsBetter => b.total_cmp(&a),
        }
    }
}

/// Distance metrics for vector similarity calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared L2 distance (smaller is better).
    #[default]
    SquaredEuclidean,
    /// L2 distance. Engines score with squared distance and the searcher
    /// normalizes with a square root.
    Euclidean,
    /// Inner product (larger is better).
    InnerProduct,
    /// Cosine similarity (larger is better).
    Cosine,
}

impl DistanceMetric {
    /// Raw engine score between two vectors.
    pub fn score(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(VecSegError::invalid_operation(format!(
                "Vector dimensions must match for distance calculation: {} vs {}",
                a.len(),
                b.len()
            )));
        }

        let result = match self {
            DistanceMetric::SquaredEuclidean | DistanceMetric::Euclidean => {
                simd::squared_l2(a, b)
            }
            DistanceMetric::InnerProduct => simd::dot(a, b),
            DistanceMetric::Cosine => {
                let norm_a = simd::norm(a);
                let norm_b = simd::norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    simd::dot(a, b) / (norm_a * norm_b)
                }
            }
        };

        Ok(result)
    }

    /// Preferred direction of scores produced by this metric.
    pub fn order(&self) -> ScoreOrder {
        match self {
            DistanceMetric::SquaredEuclidean | DistanceMetric::Euclidean => {
                ScoreOrder::SmallerIsBetter
            }
            DistanceMetric::InnerProduct | DistanceMetric::Cosine => ScoreOrder::LargerIsBetter,
        }
    }

    /// Whether raw engine scores must be post-processed before returning.
    pub fn needs_score_normalization(&self) -> bool {
        matches!(self, DistanceMetric::Euclidean)
    }

    /// Convert a raw engine score into the user-facing score.
    pub fn normalize_score(&self, raw: f32) -> f32 {
        match self {
            DistanceMetric::Euclidean => raw.max(0.0).sqrt(),
            _ => raw,
        }
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::SquaredEuclidean => "squared_euclidean",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::InnerProduct => "inner_product",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "squared_euclidean" | "squared_l2" => Ok(DistanceMetric::SquaredEuclidean),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "inner_product" | "ip" | "dot_product" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(VecSegError::config(format!("Unknown distance metric: {s}"))),
        }
    }
}
