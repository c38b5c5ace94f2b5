//! Index configuration.
//!
//! An [`IndexConfig`] fixes the embedding dimension, element type, distance
//! metric and algorithm selection for one logical vector index. It is
//! usually loaded from JSON:
//!
//! ```
//! use vecseg::vector::config::IndexConfig;
//!
//! # fn main() -> vecseg::error::Result<()> {
//! let config = IndexConfig::from_json(r#"{
//!     "dimension": 4,
//!     "distance_metric": "inner_product",
//!     "build_params": "max_neighbors=32"
//! }"#)?;
//! assert_eq!(config.dimension, 4);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSegError};
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::embedding::ElementType;
use crate::vector::engine::params::EngineParams;
use crate::vector::engine::registry::AlgorithmKind;

/// Chunk sizing of the embedding accumulation buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Nodes in the first chunk of each sub-index buffer.
    pub initial_chunk_nodes: usize,

    /// Upper bound for the size of one chunk.
    pub max_chunk_bytes: usize,

    /// Upper bound used instead of `max_chunk_bytes` by large-page buffers.
    pub large_page_chunk_bytes: usize,

    /// Allocate large-page chunks for single-category buffers.
    pub use_large_page: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            initial_chunk_nodes: 64,
            max_chunk_bytes: 1024 * 1024,
            large_page_chunk_bytes: 2 * 1024 * 1024,
            use_large_page: false,
        }
    }
}

/// Recall sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Fraction of queries re-run brute-force. Zero disables sampling.
    pub sample_ratio: f64,

    /// Capacity of the sampling job queue.
    pub queue_capacity: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        RecallConfig {
            sample_ratio: 0.0,
            queue_capacity: 16,
        }
    }
}

impl RecallConfig {
    /// Sample one query in every `interval()`; `None` when disabled.
    pub fn interval(&self) -> Option<u64> {
        if self.sample_ratio <= 0.0 {
            None
        } else {
            Some((1.0 / self.sample_ratio).round().max(1.0) as u64)
        }
    }
}

/// Configuration of one logical vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of elements per embedding.
    pub dimension: usize,

    #[serde(default)]
    pub element_type: ElementType,

    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Algorithm used to build normal segments.
    #[serde(default = "default_algorithm")]
    pub builder_algorithm: AlgorithmKind,

    /// Algorithm used to search normal segments.
    #[serde(default = "default_algorithm")]
    pub searcher_algorithm: AlgorithmKind,

    /// Algorithm used by realtime segments.
    #[serde(default = "default_algorithm")]
    pub streamer_algorithm: AlgorithmKind,

    /// Sub-indices with fewer documents are built with the linear algorithm.
    #[serde(default = "default_linear_build_threshold")]
    pub linear_build_threshold: usize,

    /// Disables the linear fallback for small sub-indices.
    #[serde(default)]
    pub distributed_build: bool,

    /// Write the raw-embedding stream next to index blobs.
    #[serde(default = "default_true")]
    pub store_embeddings: bool,

    /// Build parameter overrides, `key=value;key=value`.
    #[serde(default)]
    pub build_params: String,

    /// Default search parameters, `key=value;key=value`.
    #[serde(default)]
    pub search_params: String,

    /// Threads used to build sub-index blobs. Zero means one per CPU.
    #[serde(default)]
    pub build_threads: usize,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub recall: RecallConfig,
}

fn default_algorithm() -> AlgorithmKind {
    AlgorithmKind::Linear
}

fn default_linear_build_threshold() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            dimension: 128,
            element_type: ElementType::default(),
            distance_metric: DistanceMetric::default(),
            builder_algorithm: default_algorithm(),
            searcher_algorithm: default_algorithm(),
            streamer_algorithm: default_algorithm(),
            linear_build_threshold: default_linear_build_threshold(),
            distributed_build: false,
            store_embeddings: true,
            build_params: String::new(),
            search_params: String::new(),
            build_threads: 0,
            buffer: BufferConfig::default(),
            recall: RecallConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Create a new builder for IndexConfig.
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::new()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: IndexConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(VecSegError::config("dimension must be positive"));
        }
        if !(0.0..=1.0).contains(&self.recall.sample_ratio) {
            return Err(VecSegError::config(format!(
                "recall sample ratio {} is outside [0, 1]",
                self.recall.sample_ratio
            )));
        }
        if self.recall.queue_capacity == 0 {
            return Err(VecSegError::config("recall queue capacity must be positive"));
        }
        if self.buffer.initial_chunk_nodes == 0 {
            return Err(VecSegError::config("initial chunk node count must be positive"));
        }
        let node_bytes = self.node_bytes();
        if self.buffer.max_chunk_bytes < node_bytes
            || (self.buffer.use_large_page && self.buffer.large_page_chunk_bytes < node_bytes)
        {
            return Err(VecSegError::config(format!(
                "maximum chunk size cannot hold one {node_bytes}-byte embedding node"
            )));
        }
        EngineParams::parse(&self.build_params)?;
        EngineParams::parse(&self.search_params)?;
        Ok(())
    }

    /// Raw bytes of one embedding.
    pub fn embedding_bytes(&self) -> usize {
        self.element_type.embedding_bytes(self.dimension)
    }

    /// Bytes of one buffer node: a doc-id followed by the embedding.
    pub fn node_bytes(&self) -> usize {
        std::mem::size_of::<u32>() + self.embedding_bytes()
    }

    pub fn build_params(&self) -> Result<EngineParams> {
        EngineParams::parse(&self.build_params)
    }

    pub fn search_params(&self) -> Result<EngineParams> {
        EngineParams::parse(&self.search_params)
    }

    /// Worker threads for blob building.
    pub fn effective_build_threads(&self) -> usize {
        if self.build_threads == 0 {
            num_cpus::get()
        } else {
            self.build_threads
        }
    }
}

/// Builder for IndexConfig.
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    pub fn new() -> Self {
        IndexConfigBuilder {
            config: IndexConfig::default(),
        }
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.config.dimension = dimension;
        self
    }

    pub fn element_type(mut self, element_type: ElementType) -> Self {
        self.config.element_type = element_type;
        self
    }

    pub fn distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.config.distance_metric = metric;
        self
    }

    /// Use one algorithm for builder, searcher and streamer.
    pub fn algorithm(mut self, kind: AlgorithmKind) -> Self {
        self.config.builder_algorithm = kind;
        self.config.searcher_algorithm = kind;
        self.config.streamer_algorithm = kind;
        self
    }

    pub fn streamer_algorithm(mut self, kind: AlgorithmKind) -> Self {
        self.config.streamer_algorithm = kind;
        self
    }

    pub fn linear_build_threshold(mut self, threshold: usize) -> Self {
        self.config.linear_build_threshold = threshold;
        self
    }

    pub fn distributed_build(mut self, enabled: bool) -> Self {
        self.config.distributed_build = enabled;
        self
    }

    pub fn store_embeddings(mut self, enabled: bool) -> Self {
        self.config.store_embeddings = enabled;
        self
    }

    pub fn build_params<S: Into<String>>(mut self, params: S) -> Self {
        self.config.build_params = params.into();
        self
    }

    pub fn search_params<S: Into<String>>(mut self, params: S) -> Self {
        self.config.search_params = params.into();
        self
    }

    pub fn build_threads(mut self, threads: usize) -> Self {
        self.config.build_threads = threads;
        self
    }

    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    pub fn recall(mut self, recall: RecallConfig) -> Self {
        self.config.recall = recall;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<IndexConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
