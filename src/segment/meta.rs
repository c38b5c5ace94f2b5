//! Segment metadata and file names.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSegError};
use crate::storage::{self, Storage};
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::doc::SubIndexId;
use crate::vector::core::embedding::ElementType;
use crate::vector::engine::BuildStats;

/// Concatenated index blobs.
pub const INDEX_BLOB_FILE: &str = "index.blob";
/// Address directory of `index.blob`.
pub const INDEX_ADDR_FILE: &str = "index.addr";
/// Primary-key stream.
pub const PRIMARY_KEY_FILE: &str = "primary_key.data";
/// Optional raw-embedding stream.
pub const EMBEDDING_FILE: &str = "embedding.data";
/// Segment metadata, written last.
pub const SEGMENT_META_FILE: &str = "segment.meta";
/// Marker of a segment split into `instance_<n>` sub-directories.
pub const PARALLEL_MERGE_META_FILE: &str = "parallel_merge.meta";

pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Sub-directory name of one parallel-merge instance.
pub fn instance_dir(instance: usize) -> String {
    format!("instance_{instance}")
}

/// Whether a segment is batch-built or streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Normal,
    Realtime,
}

/// Metadata of one sub-index inside a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubIndexMeta {
    pub doc_count: u64,
    pub builder_name: String,
    pub searcher_name: String,
    #[serde(default)]
    pub build_stats: BuildStats,
    /// Whether `embedding.data` carries this sub-index.
    #[serde(default)]
    pub has_embeddings: bool,
}

/// Contents of `segment.meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub version: u32,
    pub kind: SegmentKind,
    pub doc_count: u64,
    pub sub_indices: BTreeMap<SubIndexId, SubIndexMeta>,
    pub total_bytes: u64,
    pub dimension: usize,
    pub element_type: ElementType,
    pub distance_metric: DistanceMetric,
    pub is_merged: bool,
    pub created_at: DateTime<Utc>,
}

impl SegmentMeta {
    pub fn new(
        kind: SegmentKind,
        dimension: usize,
        element_type: ElementType,
        distance_metric: DistanceMetric,
    ) -> Self {
        SegmentMeta {
            version: SEGMENT_FORMAT_VERSION,
            kind,
            doc_count: 0,
            sub_indices: BTreeMap::new(),
            total_bytes: 0,
            dimension,
            element_type,
            distance_metric,
            is_merged: false,
            created_at: Utc::now(),
        }
    }

    /// Add a sub-index and update the total doc count.
    pub fn insert_sub_index(&mut self, sub_index_id: SubIndexId, meta: SubIndexMeta) {
        if let Some(previous) = self.sub_indices.insert(sub_index_id, meta) {
            self.doc_count -= previous.doc_count;
        }
        self.doc_count += self.sub_indices[&sub_index_id].doc_count;
    }

    pub fn sub_index(&self, sub_index_id: SubIndexId) -> Result<&SubIndexMeta> {
        self.sub_indices.get(&sub_index_id).ok_or_else(|| {
            VecSegError::consistency(format!("segment has no sub-index {sub_index_id}"))
        })
    }

    /// Combine the metadata of parallel-merge instances.
    pub fn union(instances: &[SegmentMeta]) -> Result<SegmentMeta> {
        let Some(first) = instances.first() else {
            return Err(VecSegError::corruption("parallel merge has no instances"));
        };
        let mut merged = first.clone();
        merged.sub_indices.clear();
        merged.doc_count = 0;
        merged.total_bytes = 0;

        for meta in instances {
            if meta.dimension != first.dimension || meta.element_type != first.element_type {
                return Err(VecSegError::corruption(
                    "parallel merge instances disagree on embedding layout",
                ));
            }
            for (sub_index_id, sub) in &meta.sub_indices {
                if merged.sub_indices.contains_key(sub_index_id) {
                    return Err(VecSegError::corruption(format!(
                        "sub-index {sub_index_id} appears in several parallel merge instances"
                    )));
                }
                merged.insert_sub_index(*sub_index_id, sub.clone());
            }
            merged.total_bytes += meta.total_bytes;
        }
        Ok(merged)
    }

    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        storage::write_all(storage, SEGMENT_META_FILE, &json)
    }

    pub fn read(storage: &dyn Storage) -> Result<SegmentMeta> {
        let bytes = storage::read_all(storage, SEGMENT_META_FILE)?;
        let meta: SegmentMeta = serde_json::from_slice(&bytes)?;
        if meta.version != SEGMENT_FORMAT_VERSION {
            return Err(VecSegError::corruption(format!(
                "unsupported segment format version {}",
                meta.version
            )));
        }
        Ok(meta)
    }
}

/// Contents of `parallel_merge.meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelMergeMeta {
    pub instance_count: usize,
    pub created_at: DateTime<Utc>,
}

impl ParallelMergeMeta {
    pub fn new(instance_count: usize) -> Self {
        ParallelMergeMeta {
            instance_count,
            created_at: Utc::now(),
        }
    }

    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        storage::write_all(storage, PARALLEL_MERGE_META_FILE, &serde_json::to_vec(self)?)
    }

    /// Marker of `storage`, if it holds a parallel merge.
    pub fn read(storage: &dyn Storage) -> Result<Option<ParallelMergeMeta>> {
        if !storage.file_exists(PARALLEL_MERGE_META_FILE) {
            return Ok(None);
        }
        let bytes = storage::read_all(storage, PARALLEL_MERGE_META_FILE)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};

    fn sub(doc_count: u64) -> SubIndexMeta {
        SubIndexMeta {
            doc_count,
            builder_name: "linear".to_string(),
            searcher_name: "linear".to_string(),
            build_stats: BuildStats::default(),
            has_embeddings: false,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        let mut meta = SegmentMeta::new(
            SegmentKind::Normal,
            8,
            ElementType::Float32,
            DistanceMetric::Cosine,
        );
        meta.insert_sub_index(1, sub(3));
        meta.insert_sub_index(2, sub(4));
        meta.insert_sub_index(1, sub(5));
        assert_eq!(meta.doc_count, 9);

        meta.write(&storage).unwrap();
        assert_eq!(SegmentMeta::read(&storage).unwrap(), meta);
        assert!(meta.sub_index(3).is_err());
    }

    #[test]
    fn test_union_rejects_overlap() {
        let mut a = SegmentMeta::new(SegmentKind::Normal, 2, ElementType::Int8, DistanceMetric::default());
        a.insert_sub_index(1, sub(2));
        let mut b = a.clone();
        assert!(SegmentMeta::union(&[a.clone(), b.clone()]).is_err());

        b.sub_indices.clear();
        b.doc_count = 0;
        b.insert_sub_index(2, sub(3));
        let merged = SegmentMeta::union(&[a, b]).unwrap();
        assert_eq!(merged.doc_count, 5);
        assert_eq!(merged.sub_indices.len(), 2);
    }

    #[test]
    fn test_parallel_marker() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        assert_eq!(ParallelMergeMeta::read(&storage).unwrap(), None);
        ParallelMergeMeta::new(3).write(&storage).unwrap();
        assert_eq!(ParallelMergeMeta::read(&storage).unwrap().unwrap().instance_count, 3);
        assert_eq!(instance_dir(2), "instance_2");
    }
}
