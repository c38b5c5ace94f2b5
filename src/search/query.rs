//! Query shape.

use std::sync::Arc;

use crate::error::Result;
use crate::search::filter::DocPredicate;
use crate::vector::core::doc::SubIndexId;
use crate::vector::core::embedding::Embedding;
use crate::vector::engine::params::EngineParams;

/// Top-k search of one sub-index.
#[derive(Debug, Clone, PartialEq)]
pub struct SubIndexQuery {
    pub sub_index_id: SubIndexId,
    pub embeddings: Vec<Embedding>,
    pub topk: usize,
    /// Only scores strictly better than this are returned.
    pub score_threshold: Option<f32>,
    /// Engine parameter overrides, `key=value;key=value`.
    pub params: Option<String>,
}

impl SubIndexQuery {
    pub fn new(sub_index_id: SubIndexId, embeddings: Vec<Embedding>, topk: usize) -> Self {
        SubIndexQuery {
            sub_index_id,
            embeddings,
            topk,
            score_threshold: None,
            params: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// Parsed overrides; empty when none were given.
    pub fn param_overrides(&self) -> Result<EngineParams> {
        match &self.params {
            Some(text) => EngineParams::parse(text),
            None => Ok(EngineParams::new()),
        }
    }
}

/// A search request over one or more sub-indices.
#[derive(Debug, Clone, Default)]
pub struct VectorQuery {
    pub items: Vec<SubIndexQuery>,
    /// Excludes documents by global doc-id, on top of deletions.
    pub filter: Option<Arc<dyn DocPredicate>>,
    /// Search exhaustively instead of through the approximate index.
    pub bruteforce: bool,
}

impl VectorQuery {
    pub fn new(items: Vec<SubIndexQuery>) -> Self {
        VectorQuery {
            items,
            filter: None,
            bruteforce: false,
        }
    }

    pub fn single(query: SubIndexQuery) -> Self {
        VectorQuery::new(vec![query])
    }

    pub fn with_filter(mut self, filter: Arc<dyn DocPredicate>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The same query answered exhaustively.
    pub fn to_bruteforce(&self) -> VectorQuery {
        VectorQuery {
            bruteforce: true,
            ..self.clone()
        }
    }
}
