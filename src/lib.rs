//! # vecseg
//!
//! A segment-structured approximate nearest neighbor index engine.
//!
//! Embeddings are accumulated per segment, dumped into immutable on-disk
//! segments, merged, and searched together with a live realtime segment.
//! Index algorithms plug in through the [`vector::engine::AnnIndexEngine`]
//! capability; the crate ships an exact linear engine.
//!
//! ## Features
//!
//! - Chunked embedding accumulation per sub-index
//! - Normal and realtime segment builders with upsert and delete
//! - Checksummed segment files behind a pluggable storage facade
//! - Segment merge with doc-id remapping and parallel instances
//! - Deletion-aware multi-segment top-k search with context reuse
//! - Background recall sampling

pub mod cli;
pub mod error;
pub mod metrics;
pub mod search;
pub mod segment;
pub mod storage;
pub mod util;
pub mod vector;

pub mod prelude {
    pub use crate::error::{Result, VecSegError};
    pub use crate::search::context::WorkerId;
    pub use crate::search::query::{SubIndexQuery, VectorQuery};
    pub use crate::search::set::{SegmentSet, SubIndexResult};
    pub use crate::segment::builder::{BuildRecord, NormalSegmentBuilder, RealtimeSegmentBuilder};
    pub use crate::segment::merger::{MergeSource, MergeTask, SegmentMerger};
    pub use crate::segment::{NormalSegment, RealtimeSegment, Segment};
    pub use crate::vector::config::IndexConfig;
    pub use crate::vector::core::distance::DistanceMetric;
    pub use crate::vector::core::doc::{DocId, MatchItem, PrimaryKey, SubIndexId};
    pub use crate::vector::core::embedding::{ElementType, Embedding};
    pub use crate::vector::engine::registry::{AlgorithmKind, EngineRegistry};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
