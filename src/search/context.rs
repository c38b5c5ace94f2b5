//! Reusable search contexts.
//!
//! Creating an engine context can be expensive, so each worker keeps one
//! per searcher and parameter set. Workers are named explicitly by a
//! [`WorkerId`] passed down the search call rather than by thread identity.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::vector::engine::params::EngineParams;
use crate::vector::engine::{IndexHandle, SearchContext};

/// Slot of one query worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Slot used by the recall sampling thread.
    pub const RECALL: WorkerId = WorkerId(usize::MAX);
}

/// A cached context. Only its owning worker locks it.
pub type SharedContext = Arc<Mutex<Box<dyn SearchContext>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContextKey {
    worker: WorkerId,
    identity: String,
    params: String,
}

/// Contexts keyed by worker, searcher identity and parameter overrides.
///
/// Contexts live until the cache is dropped or their searcher is evicted.
#[derive(Debug, Default)]
pub struct SearchContextCache {
    contexts: RwLock<AHashMap<ContextKey, SharedContext>>,
}

impl SearchContextCache {
    pub fn new() -> Self {
        SearchContextCache::default()
    }

    /// The context of `(worker, identity, params)`, created from `handle` on
    /// first use.
    ///
    /// Overrides are applied only when a context is created; a cached one
    /// already carries them.
    pub fn get_or_create(
        &self,
        worker: WorkerId,
        identity: &str,
        params: &EngineParams,
        handle: &dyn IndexHandle,
    ) -> Result<SharedContext> {
        let key = ContextKey {
            worker,
            identity: identity.to_string(),
            params: params.to_string(),
        };
        if let Some(context) = self.contexts.read().get(&key) {
            return Ok(Arc::clone(context));
        }

        let mut context = handle.create_context()?;
        if !params.is_empty() {
            context.update_params(params)?;
        }
        let mut contexts = self.contexts.write();
        let shared = contexts
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(context)));
        Ok(Arc::clone(shared))
    }

    /// Drop every context of searchers whose identity starts with `prefix`.
    pub fn evict(&self, prefix: &str) -> usize {
        let mut contexts = self.contexts.write();
        let before = contexts.len();
        contexts.retain(|key, _| !key.identity.starts_with(prefix));
        before - contexts.len()
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    pub fn clear(&self) {
        self.contexts.write().clear();
    }
}
