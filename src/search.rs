//! Query execution over segments.
//!
//! A [`set::SegmentSet`] fans a [`query::VectorQuery`] out to one
//! [`searcher::SegmentSearcher`] per segment. Each searcher borrows a cached
//! engine context for its worker, installs the deletion filter, and appends
//! rebased hits to a [`result::ResultHolder`] which deduplicates and keeps the
//! best `k`.
//!
//! # Module Structure
//!
//! - `query`: query types
//! - `filter`: doc-id filters handed to engines
//! - `context`: per-worker search context cache
//! - `result`: cross-segment top-k aggregation
//! - `searcher`: one segment
//! - `set`: all segments of an index
//! - `recall`: background recall sampling

pub mod context;
pub mod filter;
pub mod query;
pub mod recall;
pub mod result;
pub mod searcher;
pub mod set;
