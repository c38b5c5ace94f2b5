//! Primary-key bookkeeping for a build cycle.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::error::{Result, VecSegError};
use crate::vector::core::doc::{DocId, DocIdRemap, INVALID_DOC_ID, PrimaryKey, SubIndexId};

/// Maps each primary key to its doc-id, per sub-index.
///
/// A key has at most one doc-id per sub-index and a doc-id belongs to at
/// most one key per sub-index. An installed [`DocIdRemap`] changes what
/// lookups and iteration report without touching the stored doc-ids.
#[derive(Debug, Default)]
pub struct PrimaryKeyTable {
    maps: BTreeMap<SubIndexId, AHashMap<PrimaryKey, DocId>>,
    owners: BTreeMap<SubIndexId, AHashMap<DocId, PrimaryKey>>,
    live_count: usize,
    remap: Option<DocIdRemap>,
}

impl PrimaryKeyTable {
    pub fn new() -> Self {
        PrimaryKeyTable::default()
    }

    /// Record `pk -> doc_id` in every listed sub-index.
    ///
    /// The key must not be live in any of them and the doc-id must be free
    /// in each; builders remove the old binding before adding a new one.
    /// Nothing changes when the call fails.
    pub fn add(&mut self, pk: PrimaryKey, doc_id: DocId, sub_index_ids: &[SubIndexId]) -> Result<()> {
        for sub_index_id in sub_index_ids {
            if let Some(existing) = self.maps.get(sub_index_id).and_then(|m| m.get(&pk)) {
                return Err(VecSegError::consistency(format!(
                    "pk {pk} is already bound to doc {existing} in sub-index {sub_index_id}"
                )));
            }
            if let Some(owner) = self.owner(*sub_index_id, doc_id) {
                return Err(VecSegError::consistency(format!(
                    "doc {doc_id} is already bound to pk {owner} in sub-index {sub_index_id}"
                )));
            }
        }
        let was_live = self.is_exist(pk);
        for sub_index_id in sub_index_ids {
            self.maps.entry(*sub_index_id).or_default().insert(pk, doc_id);
            self.owners.entry(*sub_index_id).or_default().insert(doc_id, pk);
        }
        if !was_live && !sub_index_ids.is_empty() {
            self.live_count += 1;
        }
        Ok(())
    }

    /// Current doc-id of `pk` and the sub-indices holding it, if live.
    pub fn binding(&self, pk: PrimaryKey) -> Result<Option<(DocId, Vec<SubIndexId>)>> {
        let mut doc_id = None;
        let mut sub_index_ids = Vec::new();
        for (sub_index_id, map) in &self.maps {
            if let Some(&bound) = map.get(&pk) {
                if doc_id.is_some_and(|d| d != bound) {
                    return Err(VecSegError::consistency(format!(
                        "pk {pk} is bound to several doc-ids"
                    )));
                }
                doc_id = Some(bound);
                sub_index_ids.push(*sub_index_id);
            }
        }
        Ok(doc_id.map(|doc_id| (doc_id, sub_index_ids)))
    }

    /// Key bound to `doc_id` in one sub-index.
    pub fn owner(&self, sub_index_id: SubIndexId, doc_id: DocId) -> Option<PrimaryKey> {
        self.owners.get(&sub_index_id)?.get(&doc_id).copied()
    }

    /// Remove `pk` from every sub-index that holds it.
    ///
    /// Returns the doc-id it was bound to and the affected sub-index ids.
    /// Nothing changes when the call fails.
    pub fn remove(&mut self, pk: PrimaryKey) -> Result<(DocId, Vec<SubIndexId>)> {
        let Some((doc_id, sub_index_ids)) = self.binding(pk)? else {
            return Err(VecSegError::not_found(format!("pk {pk}")));
        };
        for sub_index_id in &sub_index_ids {
            if let Some(map) = self.maps.get_mut(sub_index_id) {
                map.remove(&pk);
            }
            if let Some(owners) = self.owners.get_mut(sub_index_id) {
                owners.remove(&doc_id);
            }
        }
        self.live_count -= 1;
        Ok((doc_id, sub_index_ids))
    }

    /// Remove `pk` from one sub-index only, returning its doc-id there.
    ///
    /// The live count drops once the key is gone from every sub-index.
    pub fn remove_from(&mut self, pk: PrimaryKey, sub_index_id: SubIndexId) -> Option<DocId> {
        let removed = self.maps.get_mut(&sub_index_id)?.remove(&pk)?;
        if let Some(owners) = self.owners.get_mut(&sub_index_id) {
            owners.remove(&removed);
        }
        if !self.is_exist(pk) {
            self.live_count -= 1;
        }
        Some(removed)
    }

    /// Raw doc-id of `pk` in one sub-index, ignoring any remap.
    pub fn stored_doc_id(&self, pk: PrimaryKey, sub_index_id: SubIndexId) -> Option<DocId> {
        self.maps.get(&sub_index_id)?.get(&pk).copied()
    }

    /// Whether `pk` is live in any sub-index.
    pub fn is_exist(&self, pk: PrimaryKey) -> bool {
        self.maps.values().any(|map| map.contains_key(&pk))
    }

    /// Doc-id of `pk` in one sub-index, after remapping.
    pub fn lookup(&self, pk: PrimaryKey, sub_index_id: SubIndexId) -> Option<DocId> {
        let doc_id = *self.maps.get(&sub_index_id)?.get(&pk)?;
        let doc_id = self.apply_remap(doc_id);
        (doc_id != INVALID_DOC_ID).then_some(doc_id)
    }

    /// Install a read-only remap for lookups and iteration.
    pub fn set_remap(&mut self, remap: DocIdRemap) {
        self.remap = Some(remap);
    }

    pub fn clear_remap(&mut self) {
        self.remap = None;
    }

    fn apply_remap(&self, doc_id: DocId) -> DocId {
        match &self.remap {
            Some(remap) => remap.get(doc_id),
            None => doc_id,
        }
    }

    /// `(pk, doc_id)` pairs of one sub-index in ascending doc-id order.
    ///
    /// Entries the remap drops are skipped.
    pub fn entries(&self, sub_index_id: SubIndexId) -> Vec<(PrimaryKey, DocId)> {
        let Some(map) = self.maps.get(&sub_index_id) else {
            return Vec::new();
        };
        let mut entries: Vec<_> = map
            .iter()
            .map(|(&pk, &doc_id)| (pk, self.apply_remap(doc_id)))
            .filter(|&(_, doc_id)| doc_id != INVALID_DOC_ID)
            .collect();
        entries.sort_unstable_by_key(|&(pk, doc_id)| (doc_id, pk));
        entries
    }

    /// Number of keys of one sub-index that survive the remap.
    pub fn doc_count(&self, sub_index_id: SubIndexId) -> usize {
        match (&self.remap, self.maps.get(&sub_index_id)) {
            (_, None) => 0,
            (None, Some(map)) => map.len(),
            (Some(remap), Some(map)) => map.values().filter(|&&d| remap.is_live(d)).count(),
        }
    }

    /// Sub-index ids holding at least one key.
    pub fn sub_index_ids(&self) -> Vec<SubIndexId> {
        self.maps
            .iter()
            .filter(|(_, map)| !map.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of distinct live keys.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn clear(&mut self) {
        self.maps.clear();
        self.owners.clear();
        self.live_count = 0;
        self.remap = None;
    }
}
