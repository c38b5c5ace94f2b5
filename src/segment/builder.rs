//! Segment builders.
//!
//! A [`NormalSegmentBuilder`] accumulates embeddings in memory and writes an
//! immutable segment on dump. A [`RealtimeSegmentBuilder`] feeds live
//! streamers that are searchable while documents arrive.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segment::meta::{SegmentKind, SegmentMeta};
use crate::storage::Storage;
use crate::vector::core::doc::{DocId, DocIdRemap, PrimaryKey, SubIndexId};
use crate::vector::core::embedding::Embedding;

pub mod normal;
pub mod realtime;

pub use normal::NormalSegmentBuilder;
pub use realtime::{RealtimeIndex, RealtimeSegmentBuilder};

/// One document handed to a builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub pk: PrimaryKey,
    pub doc_id: DocId,
    /// Sub-indices sharing this embedding. Must not be empty.
    pub sub_index_ids: Vec<SubIndexId>,
    pub embedding: Embedding,
}

impl BuildRecord {
    pub fn new(
        pk: PrimaryKey,
        doc_id: DocId,
        sub_index_ids: Vec<SubIndexId>,
        embedding: impl Into<Embedding>,
    ) -> Self {
        BuildRecord {
            pk,
            doc_id,
            sub_index_ids,
            embedding: embedding.into(),
        }
    }
}

/// Lifecycle of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Accepting `build` and `delete`.
    Building,
    /// A normal segment was written; the builder is spent.
    Dumped,
    /// A dump failed part-way; the accumulated state is gone.
    Failed,
}

/// Either builder kind behind one interface.
#[derive(Debug)]
pub enum SegmentBuilder {
    Normal(NormalSegmentBuilder),
    Realtime(RealtimeSegmentBuilder),
}

impl SegmentBuilder {
    pub fn kind(&self) -> SegmentKind {
        match self {
            SegmentBuilder::Normal(_) => SegmentKind::Normal,
            SegmentBuilder::Realtime(_) => SegmentKind::Realtime,
        }
    }

    pub fn build(&mut self, record: &BuildRecord) -> Result<()> {
        match self {
            SegmentBuilder::Normal(builder) => builder.build(record),
            SegmentBuilder::Realtime(builder) => builder.build(record),
        }
    }

    /// Remove the document of `pk`. Returns whether it was live.
    pub fn delete(&mut self, pk: PrimaryKey) -> Result<bool> {
        match self {
            SegmentBuilder::Normal(builder) => builder.delete(pk),
            SegmentBuilder::Realtime(builder) => builder.delete(pk),
        }
    }

    pub fn dump(
        &mut self,
        storage: Arc<dyn Storage>,
        remap: Option<&DocIdRemap>,
    ) -> Result<SegmentMeta> {
        match self {
            SegmentBuilder::Normal(builder) => builder.dump(storage, remap),
            SegmentBuilder::Realtime(builder) => builder.dump(storage, remap),
        }
    }

    /// Number of distinct live primary keys.
    pub fn doc_count(&self) -> usize {
        match self {
            SegmentBuilder::Normal(builder) => builder.doc_count(),
            SegmentBuilder::Realtime(builder) => builder.doc_count(),
        }
    }
}
