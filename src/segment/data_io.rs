//! Binary layout of one segment directory.
//!
//! ```text
//! index.blob        concatenated opaque engine blobs
//! index.addr        bincode map sub_index_id -> { offset, length, crc32 }
//! primary_key.data  per sub-index: sub_index_id u64 | count u64 | count x (pk u64 | doc_id u32)
//! embedding.data    per sub-index: sub_index_id u64 | count u64 | count x (doc_id u32 | embedding)
//! segment.meta      JSON metadata, written last
//! ```
//!
//! All integers are little-endian. A directory holding `parallel_merge.meta`
//! instead consists of `instance_<n>` sub-directories with the layout above;
//! [`SegmentDataReader`] unions them transparently.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VecSegError};
use crate::segment::meta::{
    EMBEDDING_FILE, INDEX_ADDR_FILE, INDEX_BLOB_FILE, PRIMARY_KEY_FILE, ParallelMergeMeta,
    SEGMENT_META_FILE, SegmentMeta, instance_dir,
};
use crate::storage::{self, Storage, StorageOutput};
use crate::vector::core::doc::{DocId, PrimaryKey, SubIndexId};
use crate::vector::engine::EmbeddingSource;

const SECTION_HEADER_BYTES: u64 = 16;
const PK_RECORD_BYTES: usize = 12;
const EMBEDDING_BATCH: usize = 1024;

/// Location of one blob inside `index.blob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAddress {
    pub offset: u64,
    pub length: u64,
    pub crc32: u32,
}

/// Writes the files of one segment directory.
///
/// Nothing is a valid segment until [`SegmentDataWriter::finish`] has
/// written `segment.meta`. Dropping a writer without finishing leaves
/// partial files behind; call [`SegmentDataWriter::abort`] to remove them.
#[derive(Debug)]
pub struct SegmentDataWriter {
    storage: Arc<dyn Storage>,
    embedding_bytes: usize,
    blob_output: Box<dyn StorageOutput>,
    pk_output: Box<dyn StorageOutput>,
    embedding_output: Option<Box<dyn StorageOutput>>,
    addresses: BTreeMap<SubIndexId, BlobAddress>,
    pk_counts: BTreeMap<SubIndexId, u64>,
    embedding_counts: BTreeMap<SubIndexId, u64>,
}

impl SegmentDataWriter {
    pub fn create(storage: Arc<dyn Storage>, embedding_bytes: usize) -> Result<Self> {
        if storage.file_exists(SEGMENT_META_FILE) {
            storage.delete_file(SEGMENT_META_FILE)?;
        }
        let blob_output = storage.create_output(INDEX_BLOB_FILE)?;
        let pk_output = storage.create_output(PRIMARY_KEY_FILE)?;
        if storage.file_exists(EMBEDDING_FILE) {
            storage.delete_file(EMBEDDING_FILE)?;
        }
        Ok(SegmentDataWriter {
            storage,
            embedding_bytes,
            blob_output,
            pk_output,
            embedding_output: None,
            addresses: BTreeMap::new(),
            pk_counts: BTreeMap::new(),
            embedding_counts: BTreeMap::new(),
        })
    }

    /// Append the index blob of one sub-index.
    pub fn write_index_blob(&mut self, sub_index_id: SubIndexId, blob: &[u8]) -> Result<BlobAddress> {
        if self.addresses.contains_key(&sub_index_id) {
            return Err(VecSegError::consistency(format!(
                "index blob of sub-index {sub_index_id} written twice"
            )));
        }
        let address = BlobAddress {
            offset: self.blob_output.position()?,
            length: blob.len() as u64,
            crc32: crc32fast::hash(blob),
        };
        self.blob_output.write_all(blob)?;
        self.addresses.insert(sub_index_id, address);
        Ok(address)
    }

    /// Append the primary-key section of one sub-index.
    pub fn write_primary_keys(
        &mut self,
        sub_index_id: SubIndexId,
        entries: &[(PrimaryKey, DocId)],
    ) -> Result<()> {
        if self.pk_counts.contains_key(&sub_index_id) {
            return Err(VecSegError::consistency(format!(
                "primary keys of sub-index {sub_index_id} written twice"
            )));
        }
        let mut section =
            Vec::with_capacity(SECTION_HEADER_BYTES as usize + entries.len() * PK_RECORD_BYTES);
        section.write_u64::<LittleEndian>(sub_index_id)?;
        section.write_u64::<LittleEndian>(entries.len() as u64)?;
        for &(pk, doc_id) in entries {
            section.write_u64::<LittleEndian>(pk)?;
            section.write_u32::<LittleEndian>(doc_id)?;
        }
        self.pk_output.write_all(&section)?;
        self.pk_counts.insert(sub_index_id, entries.len() as u64);
        Ok(())
    }

    /// Stream every pair of `source` into the raw-embedding section of one
    /// sub-index. Returns the number of records written.
    pub fn write_embeddings(
        &mut self,
        sub_index_id: SubIndexId,
        source: &mut dyn EmbeddingSource,
    ) -> Result<u64> {
        if self.embedding_counts.contains_key(&sub_index_id) {
            return Err(VecSegError::consistency(format!(
                "embeddings of sub-index {sub_index_id} written twice"
            )));
        }
        let expected = source.len() as u64;
        let embedding_bytes = self.embedding_bytes;
        if self.embedding_output.is_none() {
            self.embedding_output = Some(self.storage.create_output(EMBEDDING_FILE)?);
        }
        let output = self
            .embedding_output
            .as_mut()
            .ok_or_else(|| VecSegError::storage("embedding output is not open"))?;

        output.write_u64::<LittleEndian>(sub_index_id)?;
        output.write_u64::<LittleEndian>(expected)?;
        let mut written = 0u64;
        while let Some((doc_id, embedding)) = source.next_embedding() {
            if embedding.len() != embedding_bytes {
                return Err(VecSegError::invalid_operation(format!(
                    "doc {doc_id}: embedding has {} bytes, expected {embedding_bytes}",
                    embedding.len()
                )));
            }
            output.write_u32::<LittleEndian>(doc_id)?;
            output.write_all(embedding)?;
            written += 1;
        }
        if written != expected {
            return Err(VecSegError::consistency(format!(
                "sub-index {sub_index_id}: embedding source reported {expected} records but yielded {written}"
            )));
        }
        self.embedding_counts.insert(sub_index_id, written);
        Ok(written)
    }

    /// Close every stream, then write the address directory and `segment.meta`.
    ///
    /// Every sub-index listed in `meta` must have a blob and a primary-key
    /// section whose count equals its recorded doc count. The total byte
    /// size is filled into `meta`.
    pub fn finish(mut self, meta: &mut SegmentMeta) -> Result<u64> {
        for (sub_index_id, sub) in &mut meta.sub_indices {
            if !self.addresses.contains_key(sub_index_id) {
                return Err(VecSegError::consistency(format!(
                    "sub-index {sub_index_id} has no index blob"
                )));
            }
            let pk_count = self.pk_counts.get(sub_index_id).copied().unwrap_or(0);
            if pk_count != sub.doc_count {
                return Err(VecSegError::consistency(format!(
                    "sub-index {sub_index_id}: metadata records {} documents but {pk_count} primary keys were written",
                    sub.doc_count
                )));
            }
            sub.has_embeddings = self.embedding_counts.contains_key(sub_index_id);
        }

        self.blob_output.flush_and_sync()?;
        self.blob_output.close()?;
        self.pk_output.flush_and_sync()?;
        self.pk_output.close()?;
        if let Some(output) = self.embedding_output.as_mut() {
            output.flush_and_sync()?;
            output.close()?;
        }

        let addr = bincode::serialize(&self.addresses)?;
        storage::write_all(self.storage.as_ref(), INDEX_ADDR_FILE, &addr)?;

        let mut total = 0u64;
        for name in [INDEX_BLOB_FILE, INDEX_ADDR_FILE, PRIMARY_KEY_FILE, EMBEDDING_FILE] {
            if self.storage.file_exists(name) {
                total += self.storage.file_size(name)?;
            }
        }
        meta.total_bytes = total;
        meta.write(self.storage.as_ref())?;

        debug!(
            sub_indices = meta.sub_indices.len(),
            doc_count = meta.doc_count,
            total_bytes = total,
            "segment data written"
        );
        Ok(total)
    }

    /// Discard everything written so far.
    pub fn abort(self) -> Result<()> {
        let SegmentDataWriter {
            storage,
            blob_output,
            pk_output,
            embedding_output,
            ..
        } = self;
        drop(blob_output);
        drop(pk_output);
        drop(embedding_output);
        for name in [
            SEGMENT_META_FILE,
            INDEX_ADDR_FILE,
            INDEX_BLOB_FILE,
            PRIMARY_KEY_FILE,
            EMBEDDING_FILE,
        ] {
            storage.delete_file(name)?;
        }
        warn!("segment write aborted");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Section {
    offset: u64,
    count: u64,
}

/// One independently valid segment directory.
#[derive(Debug)]
struct ReaderPart {
    storage: Arc<dyn Storage>,
    meta: SegmentMeta,
    addresses: BTreeMap<SubIndexId, BlobAddress>,
    pk_sections: BTreeMap<SubIndexId, Section>,
    embedding_sections: BTreeMap<SubIndexId, Section>,
}

impl ReaderPart {
    fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let meta = SegmentMeta::read(storage.as_ref())?;
        let addr_bytes = storage::read_all(storage.as_ref(), INDEX_ADDR_FILE)?;
        let addresses: BTreeMap<SubIndexId, BlobAddress> = bincode::deserialize(&addr_bytes)
            .map_err(|e| VecSegError::corruption(format!("{INDEX_ADDR_FILE}: {e}")))?;

        let blob_size = storage.file_size(INDEX_BLOB_FILE)?;
        for (sub_index_id, address) in &addresses {
            let end = address.offset.checked_add(address.length);
            if end.is_none_or(|end| end > blob_size) {
                return Err(VecSegError::corruption(format!(
                    "blob of sub-index {sub_index_id} ends past {INDEX_BLOB_FILE} ({blob_size} bytes)"
                )));
            }
        }

        let pk_sections = scan_sections(storage.as_ref(), PRIMARY_KEY_FILE, PK_RECORD_BYTES)?;
        let embedding_record = 4 + meta.element_type.embedding_bytes(meta.dimension);
        let embedding_sections = if storage.file_exists(EMBEDDING_FILE) {
            scan_sections(storage.as_ref(), EMBEDDING_FILE, embedding_record)?
        } else {
            BTreeMap::new()
        };

        for (sub_index_id, sub) in &meta.sub_indices {
            let count = pk_sections.get(sub_index_id).map_or(0, |s| s.count);
            if count != sub.doc_count {
                return Err(VecSegError::corruption(format!(
                    "sub-index {sub_index_id}: metadata records {} documents, {PRIMARY_KEY_FILE} holds {count}",
                    sub.doc_count
                )));
            }
        }

        Ok(ReaderPart {
            storage,
            meta,
            addresses,
            pk_sections,
            embedding_sections,
        })
    }
}

/// Read the section headers of a framed file.
fn scan_sections(
    storage: &dyn Storage,
    name: &str,
    record_bytes: usize,
) -> Result<BTreeMap<SubIndexId, Section>> {
    let mut input = storage.open_input(name)?;
    let size = input.size()?;
    let mut sections = BTreeMap::new();
    let mut position = 0u64;

    while position < size {
        if position + SECTION_HEADER_BYTES > size {
            return Err(VecSegError::corruption(format!(
                "{name}: truncated section header at offset {position}"
            )));
        }
        input.seek(SeekFrom::Start(position))?;
        let sub_index_id = input.read_u64::<LittleEndian>()?;
        let count = input.read_u64::<LittleEndian>()?;
        let offset = position + SECTION_HEADER_BYTES;
        let end = count
            .checked_mul(record_bytes as u64)
            .and_then(|len| len.checked_add(offset))
            .filter(|&end| end <= size)
            .ok_or_else(|| {
                VecSegError::corruption(format!(
                    "{name}: section of sub-index {sub_index_id} with {count} records is truncated"
                ))
            })?;
        if sections.insert(sub_index_id, Section { offset, count }).is_some() {
            return Err(VecSegError::corruption(format!(
                "{name}: sub-index {sub_index_id} appears twice"
            )));
        }
        position = end;
    }
    Ok(sections)
}

/// Reads a segment directory, fanning in parallel-merge instances.
#[derive(Debug)]
pub struct SegmentDataReader {
    parts: Vec<ReaderPart>,
    meta: SegmentMeta,
    embedding_bytes: usize,
}

impl SegmentDataReader {
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let parts = match ParallelMergeMeta::read(storage.as_ref())? {
            Some(marker) => (0..marker.instance_count)
                .map(|i| ReaderPart::open(storage::sub_storage(&storage, &instance_dir(i))))
                .collect::<Result<Vec<_>>>()?,
            None => vec![ReaderPart::open(storage)?],
        };
        let metas: Vec<SegmentMeta> = parts.iter().map(|p| p.meta.clone()).collect();
        let meta = if metas.len() == 1 {
            metas.into_iter().next().ok_or_else(|| VecSegError::corruption("empty segment"))?
        } else {
            SegmentMeta::union(&metas)?
        };
        let embedding_bytes = meta.element_type.embedding_bytes(meta.dimension);

        debug!(
            parts = parts.len(),
            doc_count = meta.doc_count,
            "opened segment"
        );
        Ok(SegmentDataReader {
            parts,
            meta,
            embedding_bytes,
        })
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Number of parallel-merge instances (1 for a plain segment).
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn sub_index_ids(&self) -> Vec<SubIndexId> {
        self.meta.sub_indices.keys().copied().collect()
    }

    pub fn embedding_bytes(&self) -> usize {
        self.embedding_bytes
    }

    fn part_for(&self, sub_index_id: SubIndexId) -> Result<&ReaderPart> {
        self.parts
            .iter()
            .find(|part| part.meta.sub_indices.contains_key(&sub_index_id))
            .ok_or_else(|| {
                VecSegError::consistency(format!("segment has no sub-index {sub_index_id}"))
            })
    }

    /// Read and checksum the index blob of one sub-index.
    pub fn read_index_blob(&self, sub_index_id: SubIndexId) -> Result<Vec<u8>> {
        let part = self.part_for(sub_index_id)?;
        let address = part.addresses.get(&sub_index_id).ok_or_else(|| {
            VecSegError::corruption(format!("{INDEX_ADDR_FILE} has no entry for sub-index {sub_index_id}"))
        })?;

        let mut input = part.storage.open_input(INDEX_BLOB_FILE)?;
        input.seek(SeekFrom::Start(address.offset))?;
        let mut blob = vec![0u8; address.length as usize];
        input.read_exact(&mut blob)?;

        if crc32fast::hash(&blob) != address.crc32 {
            return Err(VecSegError::corruption(format!(
                "checksum mismatch in blob of sub-index {sub_index_id}"
            )));
        }
        Ok(blob)
    }

    /// `(pk, doc_id)` records of one sub-index in stored order.
    pub fn read_primary_keys(&self, sub_index_id: SubIndexId) -> Result<Vec<(PrimaryKey, DocId)>> {
        let part = self.part_for(sub_index_id)?;
        let Some(section) = part.pk_sections.get(&sub_index_id) else {
            return Ok(Vec::new());
        };

        let mut input = part.storage.open_input(PRIMARY_KEY_FILE)?;
        input.seek(SeekFrom::Start(section.offset))?;
        let mut bytes = vec![0u8; section.count as usize * PK_RECORD_BYTES];
        input.read_exact(&mut bytes)?;

        Ok(bytes
            .chunks_exact(PK_RECORD_BYTES)
            .map(|record| {
                (
                    LittleEndian::read_u64(&record[..8]),
                    LittleEndian::read_u32(&record[8..]),
                )
            })
            .collect())
    }

    /// Whether `embedding.data` carries the given sub-index.
    pub fn has_embeddings(&self, sub_index_id: SubIndexId) -> bool {
        self.part_for(sub_index_id)
            .map(|part| part.embedding_sections.contains_key(&sub_index_id))
            .unwrap_or(false)
    }

    /// Visit the raw-embedding records of one sub-index in stored order.
    pub fn for_each_embedding(
        &self,
        sub_index_id: SubIndexId,
        visit: &mut dyn FnMut(DocId, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let part = self.part_for(sub_index_id)?;
        let section = part.embedding_sections.get(&sub_index_id).ok_or_else(|| {
            VecSegError::not_found(format!("{EMBEDDING_FILE} section of sub-index {sub_index_id}"))
        })?;

        let record_bytes = 4 + self.embedding_bytes;
        let mut input = part.storage.open_input(EMBEDDING_FILE)?;
        input.seek(SeekFrom::Start(section.offset))?;

        let mut remaining = section.count as usize;
        let mut batch = vec![0u8; EMBEDDING_BATCH.min(remaining.max(1)) * record_bytes];
        while remaining > 0 {
            let records = remaining.min(EMBEDDING_BATCH);
            let bytes = &mut batch[..records * record_bytes];
            input.read_exact(bytes)?;
            for record in bytes.chunks_exact(record_bytes) {
                visit(LittleEndian::read_u32(&record[..4]), &record[4..])?;
            }
            remaining -= records;
        }
        Ok(())
    }

    /// Check every blob checksum and every primary-key section.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for sub_index_id in self.sub_index_ids() {
            let blob = self.read_index_blob(sub_index_id)?;
            report.blob_bytes += blob.len() as u64;
            report.primary_keys += self.read_primary_keys(sub_index_id)?.len() as u64;
            if self.has_embeddings(sub_index_id) {
                let mut count = 0u64;
                self.for_each_embedding(sub_index_id, &mut |_, _| {
                    count += 1;
                    Ok(())
                })?;
                report.embeddings += count;
            }
            report.sub_indices += 1;
        }
        Ok(report)
    }
}

/// Totals gathered by [`SegmentDataReader::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub sub_indices: u64,
    pub primary_keys: u64,
    pub embeddings: u64,
    pub blob_bytes: u64,
}
