//! Doc-id filters installed into search contexts.
//!
//! Engines see segment-local doc-ids. A filter adds the segment's base
//! doc-id before consulting the deletion map or the caller's predicate, so
//! both are expressed in global doc-ids.

use std::fmt::Debug;
use std::sync::Arc;

use crate::segment::deletion::DeletionMap;
use crate::vector::core::doc::DocId;

/// Caller-supplied exclusion predicate over global doc-ids.
pub trait DocPredicate: Send + Sync + Debug {
    /// `true` excludes the document from results.
    fn excludes(&self, doc_id: DocId) -> bool;
}

/// Excludes a fixed set of doc-ids.
#[derive(Debug, Clone, Default)]
pub struct ExcludeDocIds {
    doc_ids: ahash::AHashSet<DocId>,
}

impl ExcludeDocIds {
    pub fn new<I: IntoIterator<Item = DocId>>(doc_ids: I) -> Self {
        ExcludeDocIds {
            doc_ids: doc_ids.into_iter().collect(),
        }
    }
}

impl DocPredicate for ExcludeDocIds {
    fn excludes(&self, doc_id: DocId) -> bool {
        self.doc_ids.contains(&doc_id)
    }
}

/// Excludes doc-ids at or beyond a bound.
#[derive(Debug, Clone, Copy)]
pub struct DocIdBelow(pub DocId);

impl DocPredicate for DocIdBelow {
    fn excludes(&self, doc_id: DocId) -> bool {
        doc_id >= self.0
    }
}

/// Filter applied by an engine to every candidate.
#[derive(Debug, Clone, Default)]
pub enum DocFilter {
    /// Accept every document.
    #[default]
    None,
    /// Reject deleted documents.
    Deletion {
        deletions: Arc<DeletionMap>,
        base_doc_id: DocId,
    },
    /// Reject documents that are deleted or excluded by the predicate.
    DeletionOrCustom {
        deletions: Arc<DeletionMap>,
        base_doc_id: DocId,
        custom: Arc<dyn DocPredicate>,
    },
}

impl DocFilter {
    /// Deletion filter, combined with `custom` when given.
    pub fn compose(
        deletions: Arc<DeletionMap>,
        base_doc_id: DocId,
        custom: Option<Arc<dyn DocPredicate>>,
    ) -> Self {
        match custom {
            Some(custom) => DocFilter::DeletionOrCustom {
                deletions,
                base_doc_id,
                custom,
            },
            None => DocFilter::Deletion {
                deletions,
                base_doc_id,
            },
        }
    }

    /// Whether a segment-local doc-id is rejected.
    #[inline]
    pub fn is_filtered(&self, local_doc_id: DocId) -> bool {
        match self {
            DocFilter::None => false,
            DocFilter::Deletion {
                deletions,
                base_doc_id,
            } => deletions.is_deleted(base_doc_id.saturating_add(local_doc_id)),
            DocFilter::DeletionOrCustom {
                deletions,
                base_doc_id,
                custom,
            } => {
                let global = base_doc_id.saturating_add(local_doc_id);
                deletions.is_deleted(global) || custom.excludes(global)
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DocFilter::None)
    }
}
