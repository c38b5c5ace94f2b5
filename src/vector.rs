//! Vector data types, index configuration and the ANN engine capability.
//!
//! # Module Structure
//!
//! - `core`: doc-ids, embeddings and distance metrics
//! - `config`: `IndexConfig` and its nested settings
//! - `engine`: the engine traits, registry and the linear engine

pub mod config;
pub mod core;
pub mod engine;

pub use self::core::distance::DistanceMetric;
