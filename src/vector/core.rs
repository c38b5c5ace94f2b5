//! Core data types shared by builders, segments and searchers.
//!
//! This module contains document identifiers, embedding encodings and
//! distance metrics.

pub mod distance;
pub mod doc;
pub mod embedding;
