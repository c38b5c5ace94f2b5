//! Chunked embedding accumulation for batch builds.
//!
//! An [`EmbeddingBuffer`] holds fixed-size nodes (`doc_id` followed by the
//! raw embedding bytes) for one sub-index. Nodes are appended into chunks
//! whose size doubles up to a configured maximum. Removing a document only
//! clears its live bit; the bytes are reclaimed by [`EmbeddingBuffer::shrink`],
//! which runs automatically once more than half of the used bytes are dead.
//!
//! An [`EmbeddingDataHolder`] keeps one buffer per sub-index id.

use std::collections::{BTreeMap, VecDeque};

use ahash::AHashMap;
use bit_vec::BitVec;
use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{Result, VecSegError};
use crate::vector::config::BufferConfig;
use crate::vector::core::doc::{DocId, SubIndexId};
use crate::vector::engine::EmbeddingSource;

const DOC_ID_BYTES: usize = 4;

/// Chunk sizing policy of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub initial_nodes: usize,
    pub max_chunk_bytes: usize,
}

impl ChunkPolicy {
    /// Policy for a buffer, using the large-page maximum when allowed.
    pub fn from_config(config: &BufferConfig, large_page: bool) -> Self {
        ChunkPolicy {
            initial_nodes: config.initial_chunk_nodes.max(1),
            max_chunk_bytes: if large_page {
                config.large_page_chunk_bytes
            } else {
                config.max_chunk_bytes
            },
        }
    }
}

#[derive(Debug)]
struct Chunk {
    data: Vec<u8>,
    capacity_nodes: usize,
    live: BitVec,
}

impl Chunk {
    fn with_nodes(nodes: usize, node_bytes: usize) -> Self {
        Chunk {
            data: Vec::with_capacity(nodes * node_bytes),
            capacity_nodes: nodes,
            live: BitVec::with_capacity(nodes),
        }
    }

    fn nodes(&self) -> usize {
        self.live.len()
    }

    fn is_full(&self) -> bool {
        self.nodes() >= self.capacity_nodes
    }

    fn node(&self, slot: usize, node_bytes: usize) -> (DocId, &[u8]) {
        let start = slot * node_bytes;
        let node = &self.data[start..start + node_bytes];
        (
            LittleEndian::read_u32(&node[..DOC_ID_BYTES]),
            &node[DOC_ID_BYTES..],
        )
    }
}

/// Append-only chunked buffer of `(doc_id, embedding)` nodes.
#[derive(Debug)]
pub struct EmbeddingBuffer {
    embedding_bytes: usize,
    policy: ChunkPolicy,
    chunks: Vec<Chunk>,
    next_chunk_nodes: usize,
    positions: AHashMap<DocId, (usize, usize)>,
    wasted_bytes: usize,
}

impl EmbeddingBuffer {
    pub fn new(embedding_bytes: usize, policy: ChunkPolicy) -> Self {
        EmbeddingBuffer {
            embedding_bytes,
            policy,
            chunks: Vec::new(),
            next_chunk_nodes: policy.initial_nodes,
            positions: AHashMap::new(),
            wasted_bytes: 0,
        }
    }

    pub fn node_bytes(&self) -> usize {
        DOC_ID_BYTES + self.embedding_bytes
    }

    fn max_chunk_nodes(&self) -> usize {
        (self.policy.max_chunk_bytes / self.node_bytes()).max(1)
    }

    /// Change the sizing policy for chunks allocated from now on.
    pub fn set_policy(&mut self, policy: ChunkPolicy) {
        self.policy = policy;
        self.next_chunk_nodes = self.next_chunk_nodes.min(self.max_chunk_nodes());
    }

    pub fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    /// Append a node. Adding a doc-id that is already live is a no-op.
    pub fn add(&mut self, embedding: &[u8], doc_id: DocId) -> Result<()> {
        if embedding.len() != self.embedding_bytes {
            return Err(VecSegError::invalid_operation(format!(
                "doc {doc_id}: embedding has {} bytes, buffer expects {}",
                embedding.len(),
                self.embedding_bytes
            )));
        }
        if self.positions.contains_key(&doc_id) {
            return Ok(());
        }

        if self.chunks.last().is_none_or(Chunk::is_full) {
            self.allocate_chunk();
        }
        let chunk_index = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_index];
        let slot = chunk.nodes();

        let mut id_bytes = [0u8; DOC_ID_BYTES];
        LittleEndian::write_u32(&mut id_bytes, doc_id);
        chunk.data.extend_from_slice(&id_bytes);
        chunk.data.extend_from_slice(embedding);
        chunk.live.push(true);

        self.positions.insert(doc_id, (chunk_index, slot));
        Ok(())
    }

    fn allocate_chunk(&mut self) {
        let nodes = self.next_chunk_nodes.min(self.max_chunk_nodes());
        self.chunks.push(Chunk::with_nodes(nodes, self.node_bytes()));
        self.next_chunk_nodes = (nodes * 2).min(self.max_chunk_nodes());
    }

    /// Mark `doc_id` removed. Returns whether it was live.
    pub fn remove(&mut self, doc_id: DocId) -> bool {
        let Some((chunk_index, slot)) = self.positions.remove(&doc_id) else {
            return false;
        };
        self.chunks[chunk_index].live.set(slot, false);
        self.wasted_bytes += self.node_bytes();

        if self.wasted_bytes * 2 > self.used_bytes() {
            self.shrink();
        }
        true
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.positions.contains_key(&doc_id)
    }

    /// Embedding bytes of a live document.
    pub fn get(&self, doc_id: DocId) -> Option<&[u8]> {
        let &(chunk_index, slot) = self.positions.get(&doc_id)?;
        Some(self.chunks[chunk_index].node(slot, self.node_bytes()).1)
    }

    /// Live doc-ids in ascending order.
    pub fn doc_ids(&self) -> Vec<DocId> {
        let mut doc_ids: Vec<DocId> = self.positions.keys().copied().collect();
        doc_ids.sort_unstable();
        doc_ids
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Bytes occupied by nodes, live or dead.
    pub fn used_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    /// Bytes reserved by all chunks.
    pub fn allocated_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.capacity()).sum()
    }

    /// Bytes held by removed nodes.
    pub fn wasted_bytes(&self) -> usize {
        self.wasted_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Rewrite live nodes into fresh chunks and release the old ones.
    pub fn shrink(&mut self) {
        if self.wasted_bytes == 0 {
            return;
        }
        let node_bytes = self.node_bytes();
        let old_chunks = std::mem::take(&mut self.chunks);
        let before = old_chunks.iter().map(|c| c.data.capacity()).sum::<usize>();

        self.positions.clear();
        self.wasted_bytes = 0;

        let live = old_chunks
            .iter()
            .map(|c| c.live.iter().filter(|b| *b).count())
            .sum::<usize>();
        // Size the first fresh chunk to hold the survivors when possible.
        self.next_chunk_nodes = live.max(self.policy.initial_nodes).min(self.max_chunk_nodes());

        for chunk in old_chunks {
            for slot in 0..chunk.nodes() {
                if !chunk.live[slot] {
                    continue;
                }
                let node = &chunk.data[slot * node_bytes..(slot + 1) * node_bytes];
                let doc_id = LittleEndian::read_u32(&node[..DOC_ID_BYTES]);
                if self.chunks.last().is_none_or(Chunk::is_full) {
                    self.allocate_chunk();
                }
                let chunk_index = self.chunks.len() - 1;
                let target = &mut self.chunks[chunk_index];
                let target_slot = target.nodes();
                target.data.extend_from_slice(node);
                target.live.push(true);
                self.positions.insert(doc_id, (chunk_index, target_slot));
            }
        }

        debug!(
            live,
            released_bytes = before.saturating_sub(self.allocated_bytes()),
            "shrunk embedding buffer"
        );
    }

    /// Multi-pass iterator over live nodes. Shrinks first.
    pub fn create_iterator(&mut self) -> EmbeddingIter<'_> {
        self.shrink();
        EmbeddingIter {
            node_bytes: self.node_bytes(),
            len: self.len(),
            chunks: ChunkSource::Borrowed(&self.chunks),
            chunk: 0,
            slot: 0,
        }
    }

    /// Single-pass iterator that frees every chunk once consumed.
    pub fn into_single_pass(mut self) -> EmbeddingIter<'static> {
        self.shrink();
        EmbeddingIter {
            node_bytes: self.node_bytes(),
            len: self.len(),
            chunks: ChunkSource::Owned(self.chunks.into_iter().collect()),
            chunk: 0,
            slot: 0,
        }
    }
}

#[derive(Debug)]
enum ChunkSource<'a> {
    Borrowed(&'a [Chunk]),
    Owned(VecDeque<Chunk>),
}

/// Iterator over the live nodes of a shrunk buffer.
///
/// This is a lending iterator: each embedding slice borrows the iterator
/// until the next call.
#[derive(Debug)]
pub struct EmbeddingIter<'a> {
    node_bytes: usize,
    len: usize,
    chunks: ChunkSource<'a>,
    chunk: usize,
    slot: usize,
}

impl EmbeddingIter<'_> {
    pub fn is_single_pass(&self) -> bool {
        matches!(self.chunks, ChunkSource::Owned(_))
    }

    /// Chunks still held by the iterator.
    pub fn remaining_chunks(&self) -> usize {
        match &self.chunks {
            ChunkSource::Borrowed(chunks) => chunks.len().saturating_sub(self.chunk),
            ChunkSource::Owned(chunks) => chunks.len(),
        }
    }
}

impl EmbeddingSource for EmbeddingIter<'_> {
    fn next_embedding(&mut self) -> Option<(DocId, &[u8])> {
        match &mut self.chunks {
            ChunkSource::Borrowed(chunks) => {
                while self.chunk < chunks.len() {
                    let chunk = &chunks[self.chunk];
                    if self.slot < chunk.nodes() {
                        let slot = self.slot;
                        self.slot += 1;
                        return Some(chunk.node(slot, self.node_bytes));
                    }
                    self.chunk += 1;
                    self.slot = 0;
                }
                None
            }
            ChunkSource::Owned(chunks) => {
                while chunks.front().is_some_and(|c| self.slot >= c.nodes()) {
                    chunks.pop_front();
                    self.slot = 0;
                }
                let chunk = chunks.front()?;
                let slot = self.slot;
                self.slot += 1;
                Some(chunk.node(slot, self.node_bytes))
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match self.chunks {
            ChunkSource::Borrowed(_) => {
                self.chunk = 0;
                self.slot = 0;
                Ok(())
            }
            ChunkSource::Owned(_) => Err(VecSegError::invalid_operation(
                "single-pass embedding iterator cannot be rewound",
            )),
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Per-sub-index embedding buffers of one build cycle.
///
/// Large-page chunk sizing applies only while the holder serves a single
/// sub-index; once a second sub-index appears every buffer falls back to
/// the standard maximum.
#[derive(Debug)]
pub struct EmbeddingDataHolder {
    embedding_bytes: usize,
    config: BufferConfig,
    buffers: BTreeMap<SubIndexId, EmbeddingBuffer>,
}

impl EmbeddingDataHolder {
    pub fn new(embedding_bytes: usize, config: BufferConfig) -> Self {
        EmbeddingDataHolder {
            embedding_bytes,
            config,
            buffers: BTreeMap::new(),
        }
    }

    fn is_multi_category(&self) -> bool {
        self.buffers.len() > 1
    }

    fn buffer_for(&mut self, sub_index_id: SubIndexId) -> &mut EmbeddingBuffer {
        let is_new = !self.buffers.contains_key(&sub_index_id);
        if is_new && !self.buffers.is_empty() && self.config.use_large_page {
            let standard = ChunkPolicy::from_config(&self.config, false);
            for buffer in self.buffers.values_mut() {
                buffer.set_policy(standard);
            }
        }
        let large_page = self.config.use_large_page && self.buffers.is_empty();
        let policy = ChunkPolicy::from_config(&self.config, large_page);
        let embedding_bytes = self.embedding_bytes;
        self.buffers
            .entry(sub_index_id)
            .or_insert_with(|| EmbeddingBuffer::new(embedding_bytes, policy))
    }

    pub fn add(&mut self, embedding: &[u8], doc_id: DocId, sub_index_id: SubIndexId) -> Result<()> {
        self.buffer_for(sub_index_id).add(embedding, doc_id)
    }

    /// Remove `doc_id` from each listed sub-index.
    ///
    /// Every listed sub-index must hold the document; a miss means the
    /// primary-key table and the buffers disagree, and nothing is removed.
    pub fn remove(&mut self, doc_id: DocId, sub_index_ids: &[SubIndexId]) -> Result<()> {
        if let Some(missing) = sub_index_ids
            .iter()
            .find(|&&sub_index_id| !self.contains(sub_index_id, doc_id))
        {
            return Err(VecSegError::consistency(format!(
                "doc {doc_id} is missing from embedding buffer of sub-index {missing}"
            )));
        }
        for sub_index_id in sub_index_ids {
            if let Some(buffer) = self.buffers.get_mut(sub_index_id) {
                buffer.remove(doc_id);
            }
        }
        Ok(())
    }

    pub fn contains(&self, sub_index_id: SubIndexId, doc_id: DocId) -> bool {
        self.buffers
            .get(&sub_index_id)
            .is_some_and(|buffer| buffer.contains(doc_id))
    }

    pub fn buffer(&self, sub_index_id: SubIndexId) -> Option<&EmbeddingBuffer> {
        self.buffers.get(&sub_index_id)
    }

    pub fn buffer_mut(&mut self, sub_index_id: SubIndexId) -> Option<&mut EmbeddingBuffer> {
        self.buffers.get_mut(&sub_index_id)
    }

    /// Detach the buffer of one sub-index.
    pub fn take_buffer(&mut self, sub_index_id: SubIndexId) -> Option<EmbeddingBuffer> {
        self.buffers.remove(&sub_index_id)
    }

    /// Detach every buffer, in sub-index order.
    pub fn take_all(&mut self) -> Vec<(SubIndexId, EmbeddingBuffer)> {
        std::mem::take(&mut self.buffers).into_iter().collect()
    }

    /// Sub-index ids with at least one live document.
    pub fn sub_index_ids(&self) -> Vec<SubIndexId> {
        self.buffers
            .iter()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn doc_count(&self, sub_index_id: SubIndexId) -> usize {
        self.buffers.get(&sub_index_id).map_or(0, EmbeddingBuffer::len)
    }

    pub fn total_docs(&self) -> usize {
        self.buffers.values().map(EmbeddingBuffer::len).sum()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.buffers.values().map(EmbeddingBuffer::allocated_bytes).sum()
    }

    pub fn uses_large_pages(&self) -> bool {
        self.config.use_large_page && !self.is_multi_category()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: usize, max_bytes: usize) -> ChunkPolicy {
        ChunkPolicy {
            initial_nodes: initial,
            max_chunk_bytes: max_bytes,
        }
    }

    fn collect(iter: &mut EmbeddingIter<'_>) -> Vec<(DocId, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some((doc_id, embedding)) = iter.next_embedding() {
            out.push((doc_id, embedding.to_vec()));
        }
        out
    }

    #[test]
    fn test_chunks_double_up_to_max() {
        // node = 4 + 2 bytes; max chunk holds 8 nodes
        let mut buffer = EmbeddingBuffer::new(2, policy(1, 48));
        for doc_id in 0..20 {
            buffer.add(&[doc_id as u8, 0], doc_id).unwrap();
        }
        // 1 + 2 + 4 + 8 + 8 nodes
        assert_eq!(buffer.chunk_count(), 5);
        assert_eq!(buffer.len(), 20);
        assert_eq!(buffer.get(13), Some(&[13u8, 0][..]));
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut buffer = EmbeddingBuffer::new(1, policy(4, 1024));
        buffer.add(&[1], 7).unwrap();
        buffer.add(&[2], 7).unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(7), Some(&[1u8][..]));
    }

    #[test]
    fn test_wrong_size_rejected() {
        let mut buffer = EmbeddingBuffer::new(4, policy(4, 1024));
        assert!(buffer.add(&[1, 2], 0).is_err());
    }

    #[test]
    fn test_remove_triggers_shrink() {
        let mut buffer = EmbeddingBuffer::new(1, policy(2, 1024));
        for doc_id in 0..4 {
            buffer.add(&[doc_id as u8], doc_id).unwrap();
        }
        assert!(buffer.remove(0));
        assert!(!buffer.remove(0));
        assert_eq!(buffer.wasted_bytes(), 5);
        assert!(buffer.remove(1));
        // exactly half wasted does not shrink
        assert_eq!(buffer.wasted_bytes(), 10);
        assert!(buffer.remove(2));
        assert_eq!(buffer.wasted_bytes(), 0);
        assert_eq!(buffer.used_bytes(), 5);
        assert_eq!(buffer.get(3), Some(&[3u8][..]));
    }

    #[test]
    fn test_multi_pass_iterator() {
        let mut buffer = EmbeddingBuffer::new(1, policy(2, 1024));
        for doc_id in 0..5 {
            buffer.add(&[doc_id as u8 * 10], doc_id).unwrap();
        }
        buffer.remove(3);

        let mut iter = buffer.create_iterator();
        assert_eq!(iter.len(), 4);
        let first = collect(&mut iter);
        iter.rewind().unwrap();
        let second = collect(&mut iter);
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
            vec![0, 1, 2, 4]
        );
    }

    #[test]
    fn test_single_pass_frees_chunks() {
        let mut buffer = EmbeddingBuffer::new(1, policy(1, 1024));
        for doc_id in 0..7 {
            buffer.add(&[doc_id as u8], doc_id).unwrap();
        }
        assert_eq!(buffer.chunk_count(), 3);

        let mut iter = buffer.into_single_pass();
        assert!(iter.is_single_pass());
        assert!(iter.rewind().is_err());

        let mut seen = 0;
        while let Some((doc_id, embedding)) = iter.next_embedding() {
            assert_eq!(embedding, &[doc_id as u8]);
            seen += 1;
            if seen == 2 {
                // the first chunk (one node) has been released
                assert_eq!(iter.remaining_chunks(), 2);
            }
        }
        assert_eq!(seen, 7);
        assert_eq!(iter.remaining_chunks(), 0);
    }

    #[test]
    fn test_holder_large_page_only_single_category() {
        let config = BufferConfig {
            initial_chunk_nodes: 1,
            max_chunk_bytes: 10,
            large_page_chunk_bytes: 100,
            use_large_page: true,
        };
        let mut holder = EmbeddingDataHolder::new(1, config);
        holder.add(&[1], 0, 7).unwrap();
        assert!(holder.uses_large_pages());
        assert_eq!(holder.buffer(7).unwrap().policy().max_chunk_bytes, 100);

        holder.add(&[2], 1, 8).unwrap();
        assert!(!holder.uses_large_pages());
        assert_eq!(holder.buffer(7).unwrap().policy().max_chunk_bytes, 10);
        assert_eq!(holder.buffer(8).unwrap().policy().max_chunk_bytes, 10);
    }

    #[test]
    fn test_holder_remove_consistency() {
        let mut holder = EmbeddingDataHolder::new(1, BufferConfig::default());
        holder.add(&[1], 3, 1).unwrap();
        holder.add(&[1], 3, 2).unwrap();
        holder.remove(3, &[1]).unwrap();
        assert!(!holder.contains(1, 3));
        assert!(holder.contains(2, 3));
        assert_eq!(holder.sub_index_ids(), vec![2]);

        let err = holder.remove(3, &[1]).unwrap_err();
        assert!(matches!(err, VecSegError::Consistency(_)));
    }

    #[test]
    fn test_holder_failed_remove_changes_nothing() {
        let mut holder = EmbeddingDataHolder::new(1, BufferConfig::default());
        holder.add(&[1], 3, 1).unwrap();
        holder.add(&[2], 4, 2).unwrap();

        let err = holder.remove(3, &[1, 2]).unwrap_err();
        assert!(matches!(err, VecSegError::Consistency(_)));
        assert!(holder.contains(1, 3));
        assert!(holder.contains(2, 4));
        assert_eq!(holder.total_docs(), 2);
    }
}
