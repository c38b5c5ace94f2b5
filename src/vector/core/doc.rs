//! Document identifiers and doc-id remapping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Dense, segment-local document identifier.
pub type DocId = u32;

/// Caller-supplied primary key.
pub type PrimaryKey = u64;

/// Logical sub-index (category) identifier.
pub type SubIndexId = u64;

/// Marks a document that does not exist or has been filtered out.
pub const INVALID_DOC_ID: DocId = DocId::MAX;

/// One scored document returned by a search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchItem {
    pub doc_id: DocId,
    pub score: f32,
}

impl MatchItem {
    pub fn new(doc_id: DocId, score: f32) -> Self {
        MatchItem { doc_id, score }
    }
}

/// Read-only mapping from old segment-local doc-ids to new doc-ids.
///
/// Entries equal to [`INVALID_DOC_ID`] mark deleted documents, as do
/// old doc-ids beyond the end of the map. The map is shared, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocIdRemap {
    map: Arc<[DocId]>,
}

impl DocIdRemap {
    /// Wrap an existing remap array.
    pub fn new(map: impl Into<Arc<[DocId]>>) -> Self {
        DocIdRemap { map: map.into() }
    }

    /// Identity mapping for `count` documents.
    pub fn identity(count: usize) -> Self {
        DocIdRemap::new((0..count as DocId).collect::<Vec<_>>())
    }

    /// Identity mapping with every doc-id in `deleted` invalidated.
    pub fn with_deletions(count: usize, deleted: &[DocId]) -> Self {
        let mut map: Vec<DocId> = (0..count as DocId).collect();
        for &doc_id in deleted {
            if let Some(slot) = map.get_mut(doc_id as usize) {
                *slot = INVALID_DOC_ID;
            }
        }
        DocIdRemap::new(map)
    }

    /// New doc-id for `old`, or [`INVALID_DOC_ID`] if it was dropped.
    #[inline]
    pub fn get(&self, old: DocId) -> DocId {
        self.map.get(old as usize).copied().unwrap_or(INVALID_DOC_ID)
    }

    /// Whether `old` survives the remap.
    #[inline]
    pub fn is_live(&self, old: DocId) -> bool {
        self.get(old) != INVALID_DOC_ID
    }

    /// Number of old doc-ids covered.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of old doc-ids that survive.
    pub fn live_count(&self) -> usize {
        self.map.iter().filter(|&&d| d != INVALID_DOC_ID).count()
    }

    /// A view of the old doc-id range `[start, start + len)` rebased to zero.
    ///
    /// Merge inputs are remapped through one global reclaim map; each input
    /// segment sees the slice for its own doc-id range.
    pub fn slice(&self, start: usize, len: usize) -> DocIdRemap {
        let end = (start + len).min(self.map.len());
        let start = start.min(end);
        let mut part: Vec<DocId> = self.map[start..end].to_vec();
        part.resize(len, INVALID_DOC_ID);
        DocIdRemap::new(part)
    }
}
