//! Engine parameter text and parameter tuning.
//!
//! Parameters travel as `key=value;key=value` text. The canonical form
//! sorts keys, so two parameter sets with the same entries render to the
//! same string and share one cached search context.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSegError};
use crate::vector::engine::registry::AlgorithmKind;

/// Parsed engine parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParams {
    entries: BTreeMap<String, String>,
}

impl EngineParams {
    pub fn new() -> Self {
        EngineParams::default()
    }

    /// Parse `key=value;key=value` text. Empty segments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(VecSegError::config(format!(
                    "malformed parameter '{part}' in '{text}': expected key=value"
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(VecSegError::config(format!(
                    "empty parameter name in '{text}'"
                )));
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Ok(EngineParams { entries })
    }

    pub fn set<K: Into<String>, V: ToString>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn with<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Typed lookup; a present but unparsable value is a config error.
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                VecSegError::config(format!("parameter {key}={value} is not an integer"))
            }),
        }
    }

    pub fn get_f32(&self, key: &str) -> Result<Option<f32>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                VecSegError::config(format!("parameter {key}={value} is not a number"))
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries of `overrides` replace entries of `self`.
    pub fn merged(&self, overrides: &EngineParams) -> EngineParams {
        let mut entries = self.entries.clone();
        for (key, value) in &overrides.entries {
            entries.insert(key.clone(), value.clone());
        }
        EngineParams { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for EngineParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Produces build parameters for an algorithm from a document count and
/// user overrides.
pub trait ParamTuner: Send + Sync + fmt::Debug {
    fn tune(&self, kind: AlgorithmKind, doc_count: usize, overrides: &EngineParams)
    -> EngineParams;
}

/// Size-based defaults for the built-in algorithm kinds.
#[derive(Debug, Clone, Default)]
pub struct DefaultParamTuner;

impl ParamTuner for DefaultParamTuner {
    fn tune(
        &self,
        kind: AlgorithmKind,
        doc_count: usize,
        overrides: &EngineParams,
    ) -> EngineParams {
        let mut params = EngineParams::new();
        match kind {
            AlgorithmKind::Linear => {}
            AlgorithmKind::Graph => {
                let neighbors = if doc_count > 1_000_000 { 32 } else { 16 };
                params.set("max_neighbors", neighbors);
                params.set("ef_construction", neighbors * 10);
                params.set("ef_search", neighbors * 4);
            }
            AlgorithmKind::Cluster => {
                let centroids = ((doc_count as f64).sqrt().ceil() as usize).max(1);
                params.set("centroids", centroids);
                params.set("scan_ratio", "0.05");
            }
        }
        params.merged(overrides)
    }
}
