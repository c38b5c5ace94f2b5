//! Tombstone tracking for segment documents.
//!
//! A [`DeletionMap`] is read by every concurrent searcher and written by
//! the builder that owns the segment. Each doc-id is one bit inside an
//! `AtomicU64` word, so a reader observes a document as either live or
//! deleted, never anything in between. The word vector only takes the
//! write lock when it has to grow.

use std::sync::atomic::{AtomicU64, Ordering};

use bit_vec::BitVec;
use parking_lot::RwLock;

use crate::vector::core::doc::{DocId, DocIdRemap, INVALID_DOC_ID};

const WORD_BITS: usize = 64;

/// Concurrent, growable doc-id tombstone bitmap.
#[derive(Debug, Default)]
pub struct DeletionMap {
    words: RwLock<Vec<AtomicU64>>,
    deleted_count: AtomicU64,
}

impl DeletionMap {
    pub fn new() -> Self {
        DeletionMap::default()
    }

    /// Pre-size for `capacity` doc-ids.
    pub fn with_capacity(capacity: usize) -> Self {
        let words = (0..capacity.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        DeletionMap {
            words: RwLock::new(words),
            deleted_count: AtomicU64::new(0),
        }
    }

    /// Mark `doc_id` deleted. Returns whether it was live before.
    pub fn delete(&self, doc_id: DocId) -> bool {
        if doc_id == INVALID_DOC_ID {
            return false;
        }
        let index = doc_id as usize / WORD_BITS;
        let mask = 1u64 << (doc_id as usize % WORD_BITS);

        {
            let words = self.words.read();
            if let Some(word) = words.get(index) {
                return self.set_bit(word, mask);
            }
        }

        let mut words = self.words.write();
        if words.len() <= index {
            let grown = (index + 1).max(words.len() * 2);
            words.resize_with(grown, || AtomicU64::new(0));
        }
        self.set_bit(&words[index], mask)
    }

    fn set_bit(&self, word: &AtomicU64, mask: u64) -> bool {
        let previous = word.fetch_or(mask, Ordering::AcqRel);
        let newly_deleted = previous & mask == 0;
        if newly_deleted {
            self.deleted_count.fetch_add(1, Ordering::AcqRel);
        }
        newly_deleted
    }

    #[inline]
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        let index = doc_id as usize / WORD_BITS;
        let mask = 1u64 << (doc_id as usize % WORD_BITS);
        self.words
            .read()
            .get(index)
            .map(|word| word.load(Ordering::Acquire) & mask != 0)
            .unwrap_or(false)
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted_count.load(Ordering::Acquire)
    }

    /// Deleted doc-ids in ascending order.
    pub fn deleted_ids(&self) -> Vec<DocId> {
        let words = self.words.read();
        let mut ids = Vec::with_capacity(self.deleted_count() as usize);
        for (index, word) in words.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                ids.push((index * WORD_BITS + bit) as DocId);
                bits &= bits - 1;
            }
        }
        ids
    }

    /// Snapshot as a bit vector covering `len` doc-ids.
    pub fn to_bitvec(&self, len: usize) -> BitVec {
        let mut bits = BitVec::from_elem(len, false);
        for doc_id in self.deleted_ids() {
            if (doc_id as usize) < len {
                bits.set(doc_id as usize, true);
            }
        }
        bits
    }

    pub fn from_bitvec(bits: &BitVec) -> Self {
        let map = DeletionMap::with_capacity(bits.len());
        for (doc_id, deleted) in bits.iter().enumerate() {
            if deleted {
                map.delete(doc_id as DocId);
            }
        }
        map
    }

    /// Reclaim map for `doc_count` documents.
    ///
    /// Deleted documents map to [`INVALID_DOC_ID`]. With `compact` the
    /// surviving documents are renumbered densely from zero; otherwise they
    /// keep their doc-ids.
    pub fn reclaim_remap(&self, doc_count: usize, compact: bool) -> DocIdRemap {
        let mut next: DocId = 0;
        let map: Vec<DocId> = (0..doc_count as DocId)
            .map(|doc_id| {
                if self.is_deleted(doc_id) {
                    INVALID_DOC_ID
                } else if compact {
                    next += 1;
                    next - 1
                } else {
                    doc_id
                }
            })
            .collect();
        DocIdRemap::new(map)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_delete_and_grow() {
        let map = DeletionMap::new();
        assert!(!map.is_deleted(3));
        assert!(map.delete(3));
        assert!(!map.delete(3));
        assert!(map.delete(1000));
        assert!(map.is_deleted(1000));
        assert!(!map.is_deleted(999));
        assert_eq!(map.deleted_count(), 2);
        assert_eq!(map.deleted_ids(), vec![3, 1000]);
        assert!(!map.delete(INVALID_DOC_ID));
    }

    #[test]
    fn test_bitvec_roundtrip() {
        let map = DeletionMap::with_capacity(10);
        map.delete(2);
        map.delete(9);
        let bits = map.to_bitvec(10);
        assert!(bits[2] && bits[9] && !bits[3]);

        let restored = DeletionMap::from_bitvec(&bits);
        assert_eq!(restored.deleted_ids(), vec![2, 9]);
    }

    #[test]
    fn test_reclaim_remap() {
        let map = DeletionMap::new();
        for doc_id in [0, 1, 2, 3, 5, 7, 9] {
            map.delete(doc_id);
        }
        let sparse = map.reclaim_remap(10, false);
        let live: Vec<_> = (0..10).filter(|&d| sparse.is_live(d)).collect();
        assert_eq!(live, vec![4, 6, 8]);
        assert_eq!(sparse.get(6), 6);

        let compact = map.reclaim_remap(10, true);
        assert_eq!(compact.get(4), 0);
        assert_eq!(compact.get(8), 2);
    }

    #[test]
    fn test_concurrent_deletes() {
        let map = Arc::new(DeletionMap::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for doc_id in (t..2000).step_by(4) {
                        map.delete(doc_id as DocId);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.deleted_count(), 2000);
        assert!((0..2000).all(|d| map.is_deleted(d)));
    }
}
