//! Algorithm kinds and the engine registry.
//!
//! The set of algorithm kinds is closed. Each kind maps to at most one
//! registered [`AnnIndexEngine`]; the table is assembled once through
//! [`EngineRegistryBuilder`] and is immutable afterwards.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSegError};
use crate::vector::engine::AnnIndexEngine;
use crate::vector::engine::linear::LinearEngine;
use crate::vector::engine::params::{DefaultParamTuner, ParamTuner};

/// Supported ANN algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Exact scan over all embeddings.
    Linear,
    /// Proximity-graph index.
    Graph,
    /// Clustered (inverted-list) index.
    Cluster,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 3] = [
        AlgorithmKind::Linear,
        AlgorithmKind::Graph,
        AlgorithmKind::Cluster,
    ];

    /// Name recorded in segment metadata.
    pub fn name(self) -> &'static str {
        match self {
            AlgorithmKind::Linear => "linear",
            AlgorithmKind::Graph => "graph",
            AlgorithmKind::Cluster => "cluster",
        }
    }

    /// Parse a recorded algorithm name.
    pub fn parse_str(name: &str) -> Result<Self> {
        AlgorithmKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| VecSegError::config(format!("Unknown algorithm: {name}")))
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `(builder, streamer)` pairs for which a streamer may load a normal-segment
/// blob as its initial state.
///
/// Linear blobs carry no trained state, so a linear streamer always starts cold.
pub const WARM_START_COMPATIBLE: &[(AlgorithmKind, AlgorithmKind)] = &[
    (AlgorithmKind::Graph, AlgorithmKind::Graph),
    (AlgorithmKind::Cluster, AlgorithmKind::Cluster),
];

/// Whether a streamer of kind `streamer` can start from a blob built by `builder`.
pub fn can_warm_start(builder: AlgorithmKind, streamer: AlgorithmKind) -> bool {
    WARM_START_COMPATIBLE.contains(&(builder, streamer))
}

/// Immutable mapping from algorithm kind to engine.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    engines: AHashMap<AlgorithmKind, Arc<dyn AnnIndexEngine>>,
    tuner: Arc<dyn ParamTuner>,
}

impl EngineRegistry {
    /// Create a builder with the built-in linear engine registered.
    pub fn builder() -> EngineRegistryBuilder {
        EngineRegistryBuilder::new()
    }

    /// Registry holding only the built-in engines.
    pub fn with_defaults() -> Self {
        EngineRegistry::builder().build()
    }

    /// Engine registered for `kind`.
    pub fn get(&self, kind: AlgorithmKind) -> Result<Arc<dyn AnnIndexEngine>> {
        self.engines.get(&kind).cloned().ok_or_else(|| {
            VecSegError::config(format!("No engine registered for algorithm {kind}"))
        })
    }

    /// Engine for an algorithm name read from segment metadata.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn AnnIndexEngine>> {
        self.get(AlgorithmKind::parse_str(name)?)
    }

    pub fn contains(&self, kind: AlgorithmKind) -> bool {
        self.engines.contains_key(&kind)
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<AlgorithmKind> {
        let mut kinds: Vec<_> = self.engines.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn tuner(&self) -> &Arc<dyn ParamTuner> {
        &self.tuner
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        EngineRegistry::with_defaults()
    }
}

/// Builder for [`EngineRegistry`].
#[derive(Debug)]
pub struct EngineRegistryBuilder {
    engines: AHashMap<AlgorithmKind, Arc<dyn AnnIndexEngine>>,
    tuner: Arc<dyn ParamTuner>,
}

impl EngineRegistryBuilder {
    pub fn new() -> Self {
        let mut engines: AHashMap<AlgorithmKind, Arc<dyn AnnIndexEngine>> = AHashMap::new();
        engines.insert(AlgorithmKind::Linear, Arc::new(LinearEngine::new()));
        EngineRegistryBuilder {
            engines,
            tuner: Arc::new(DefaultParamTuner),
        }
    }

    /// Register `engine` under its own kind, replacing any previous engine.
    pub fn register(mut self, engine: Arc<dyn AnnIndexEngine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    pub fn tuner(mut self, tuner: Arc<dyn ParamTuner>) -> Self {
        self.tuner = tuner;
        self
    }

    pub fn build(self) -> EngineRegistry {
        EngineRegistry {
            engines: self.engines,
            tuner: self.tuner,
        }
    }
}

impl Default for EngineRegistryBuilder {
    fn default() -> Self {
        EngineRegistryBuilder::new()
    }
}
