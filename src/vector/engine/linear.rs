//! Exact-scan engine.
//!
//! The linear engine keeps every embedding and scores all of them for each
//! query. It backs tiny sub-indices, serves brute-force searches, and is the
//! reference engine for every other component.
//!
//! Blob layout (little-endian):
//!
//! ```text
//! magic "VSLN" | version u32 | dimension u32 | element type u8 | count u32
//! count x (doc_id u32 | embedding bytes)
//! ```

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;

use crate::error::{Result, VecSegError};
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::doc::{DocId, MatchItem};
use crate::vector::core::embedding::ElementType;
use crate::vector::engine::registry::AlgorithmKind;
use crate::vector::engine::{
    AnnIndexEngine, BasicSearchContext, BuildStats, EmbeddingSource, EngineConfig, IndexBuilder,
    IndexHandle, SearchContext, Streamer, StreamerResource,
};

const MAGIC: &[u8; 4] = b"VSLN";
const VERSION: u32 = 1;

fn element_code(element_type: ElementType) -> u8 {
    match element_type {
        ElementType::Float32 => 0,
        ElementType::Int8 => 1,
    }
}

/// The built-in exact-scan engine.
#[derive(Debug, Clone, Default)]
pub struct LinearEngine;

impl LinearEngine {
    pub fn new() -> Self {
        LinearEngine
    }
}

impl AnnIndexEngine for LinearEngine {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Linear
    }

    fn create_builder(
        &self,
        config: &EngineConfig,
        doc_count: usize,
    ) -> Result<Box<dyn IndexBuilder>> {
        Ok(Box::new(LinearBuilder {
            config: config.clone(),
            entries: Vec::with_capacity(doc_count),
            stats: BuildStats::default(),
        }))
    }

    fn create_searcher(&self, config: &EngineConfig, blob: &[u8]) -> Result<Box<dyn IndexHandle>> {
        let entries = read_blob(config, blob)?;
        Ok(Box::new(LinearIndex::new(config, entries)?))
    }

    fn create_streamer(
        &self,
        config: &EngineConfig,
        resource: StreamerResource<'_>,
    ) -> Result<Box<dyn Streamer>> {
        let entries = match resource {
            StreamerResource::Cold => BTreeMap::new(),
            StreamerResource::WarmStart(blob) => read_blob(config, blob)?.into_iter().collect(),
        };
        Ok(Box::new(LinearStreamer {
            config: config.clone(),
            entries: RwLock::new(entries),
        }))
    }
}

fn write_blob<'a, I>(
    config: &EngineConfig,
    count: usize,
    entries: I,
    out: &mut dyn Write,
) -> Result<u64>
where
    I: Iterator<Item = (DocId, &'a [u8])>,
{
    out.write_all(MAGIC)?;
    out.write_u32::<LittleEndian>(VERSION)?;
    out.write_u32::<LittleEndian>(config.dimension as u32)?;
    out.write_u8(element_code(config.element_type))?;
    out.write_u32::<LittleEndian>(count as u32)?;

    let mut written = 0usize;
    for (doc_id, embedding) in entries {
        out.write_u32::<LittleEndian>(doc_id)?;
        out.write_all(embedding)?;
        written += 1;
    }
    if written != count {
        return Err(VecSegError::consistency(format!(
            "linear blob header says {count} documents but {written} were written"
        )));
    }

    let header = MAGIC.len() + 4 + 4 + 1 + 4;
    Ok((header + count * (4 + config.embedding_bytes())) as u64)
}

fn read_blob(config: &EngineConfig, blob: &[u8]) -> Result<Vec<(DocId, Vec<u8>)>> {
    let mut cursor = Cursor::new(blob);
    let mut magic = [0u8; 4];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| VecSegError::corruption("linear blob is truncated"))?;
    if &magic != MAGIC {
        return Err(VecSegError::corruption("not a linear index blob"));
    }

    let truncated = |_: std::io::Error| VecSegError::corruption("linear blob header is truncated");
    let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    if version != VERSION {
        return Err(VecSegError::corruption(format!(
            "unsupported linear blob version {version}"
        )));
    }
    let dimension = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let element = cursor.read_u8().map_err(truncated)?;
    let count = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;

    if dimension != config.dimension || element != element_code(config.element_type) {
        return Err(VecSegError::corruption(format!(
            "linear blob holds dimension {dimension}, expected {}",
            config.dimension
        )));
    }

    let embedding_bytes = config.embedding_bytes();
    let remaining = blob.len() - cursor.position() as usize;
    if remaining != count * (4 + embedding_bytes) {
        return Err(VecSegError::corruption(format!(
            "linear blob body is {remaining} bytes, expected {} documents",
            count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let doc_id = cursor.read_u32::<LittleEndian>()?;
        let mut embedding = vec![0u8; embedding_bytes];
        cursor.read_exact(&mut embedding)?;
        entries.push((doc_id, embedding));
    }
    Ok(entries)
}

/// Score every candidate against each query and keep the best `topk`.
fn scan<F>(
    config: &EngineConfig,
    context: &mut dyn SearchContext,
    queries: &[&[u8]],
    mut candidates: F,
) -> Result<()>
where
    F: FnMut(&mut dyn FnMut(DocId, &[f32]) -> Result<()>) -> Result<()>,
{
    let metric: DistanceMetric = config.metric;
    let order = metric.order();
    let topk = context.topk();
    let mut filtered = 0u64;
    let mut evaluated = 0u64;
    let mut results = Vec::with_capacity(queries.len());

    for query in queries {
        let query = config.element_type.decode(query, config.dimension)?;
        let mut hits: Vec<MatchItem> = Vec::new();
        let filter = context.filter().clone();
        candidates(&mut |doc_id, embedding| {
            if filter.is_filtered(doc_id) {
                filtered += 1;
                return Ok(());
            }
            evaluated += 1;
            hits.push(MatchItem::new(doc_id, metric.score(&query, embedding)?));
            Ok(())
        })?;
        hits.sort_by(|a, b| order.compare(a.score, b.score));
        hits.truncate(topk);
        results.push(hits);
    }

    let stats = context.stats_mut();
    stats.filtered_count += filtered;
    stats.dist_calc_count += evaluated;
    context.set_results(results);
    Ok(())
}

/// Builder collecting embeddings for a linear blob.
#[derive(Debug)]
struct LinearBuilder {
    config: EngineConfig,
    entries: Vec<(DocId, Vec<u8>)>,
    stats: BuildStats,
}

impl IndexBuilder for LinearBuilder {
    fn train(&mut self, _source: &mut dyn EmbeddingSource) -> Result<()> {
        Ok(())
    }

    fn build(&mut self, source: &mut dyn EmbeddingSource) -> Result<()> {
        let started = std::time::Instant::now();
        let expected = self.config.embedding_bytes();
        while let Some((doc_id, embedding)) = source.next_embedding() {
            if embedding.len() != expected {
                self.stats.discarded_count += 1;
                continue;
            }
            self.entries.push((doc_id, embedding.to_vec()));
        }
        self.entries.sort_by_key(|(doc_id, _)| *doc_id);
        self.stats.built_count = self.entries.len() as u64;
        self.stats.build_millis = started.elapsed().as_millis() as u64;
        Ok(())
    }

    fn dump(&mut self, out: &mut dyn Write) -> Result<u64> {
        let bytes = write_blob(
            &self.config,
            self.entries.len(),
            self.entries.iter().map(|(d, e)| (*d, e.as_slice())),
            out,
        )?;
        self.stats.dumped_bytes = bytes;
        Ok(bytes)
    }

    fn stats(&self) -> BuildStats {
        self.stats.clone()
    }
}

/// A loaded linear blob.
#[derive(Debug)]
struct LinearIndex {
    config: EngineConfig,
    doc_ids: Vec<DocId>,
    raw: Vec<Vec<u8>>,
    decoded: Vec<Vec<f32>>,
}

impl LinearIndex {
    fn new(config: &EngineConfig, entries: Vec<(DocId, Vec<u8>)>) -> Result<Self> {
        let mut doc_ids = Vec::with_capacity(entries.len());
        let mut raw = Vec::with_capacity(entries.len());
        let mut decoded = Vec::with_capacity(entries.len());
        for (doc_id, embedding) in entries {
            decoded.push(config.element_type.decode(&embedding, config.dimension)?);
            doc_ids.push(doc_id);
            raw.push(embedding);
        }
        Ok(LinearIndex {
            config: config.clone(),
            doc_ids,
            raw,
            decoded,
        })
    }
}

impl IndexHandle for LinearIndex {
    fn create_context(&self) -> Result<Box<dyn SearchContext>> {
        Ok(Box::new(BasicSearchContext::new(self.config.params.clone())))
    }

    fn search(&self, context: &mut dyn SearchContext, queries: &[&[u8]]) -> Result<()> {
        scan(&self.config, context, queries, |visit| {
            for (doc_id, embedding) in self.doc_ids.iter().zip(&self.decoded) {
                visit(*doc_id, embedding.as_slice())?;
            }
            Ok(())
        })
    }

    fn search_bruteforce(
        &self,
        context: &mut dyn SearchContext,
        queries: &[&[u8]],
    ) -> Result<()> {
        self.search(context, queries)
    }

    fn doc_count(&self) -> usize {
        self.doc_ids.len()
    }

    fn scan_embeddings(&self, visit: &mut dyn FnMut(DocId, &[u8]) -> Result<()>) -> Result<()> {
        for (doc_id, embedding) in self.doc_ids.iter().zip(&self.raw) {
            visit(*doc_id, embedding.as_slice())?;
        }
        Ok(())
    }
}

/// Mutable linear index for realtime segments.
#[derive(Debug)]
struct LinearStreamer {
    config: EngineConfig,
    entries: RwLock<BTreeMap<DocId, Vec<u8>>>,
}

impl IndexHandle for LinearStreamer {
    fn create_context(&self) -> Result<Box<dyn SearchContext>> {
        Ok(Box::new(BasicSearchContext::new(self.config.params.clone())))
    }

    fn search(&self, context: &mut dyn SearchContext, queries: &[&[u8]]) -> Result<()> {
        let entries = self.entries.read();
        let mut scratch = vec![0.0f32; self.config.dimension];
        scan(&self.config, context, queries, |visit| {
            for (doc_id, embedding) in entries.iter() {
                self.config.element_type.decode_into(embedding, &mut scratch);
                visit(*doc_id, &scratch)?;
            }
            Ok(())
        })
    }

    fn search_bruteforce(
        &self,
        context: &mut dyn SearchContext,
        queries: &[&[u8]],
    ) -> Result<()> {
        self.search(context, queries)
    }

    fn doc_count(&self) -> usize {
        self.entries.read().len()
    }

    fn scan_embeddings(&self, visit: &mut dyn FnMut(DocId, &[u8]) -> Result<()>) -> Result<()> {
        for (doc_id, embedding) in self.entries.read().iter() {
            visit(*doc_id, embedding.as_slice())?;
        }
        Ok(())
    }
}

impl Streamer for LinearStreamer {
    fn add(&self, doc_id: DocId, embedding: &[u8]) -> Result<()> {
        if embedding.len() != self.config.embedding_bytes() {
            return Err(VecSegError::engine(format!(
                "doc {doc_id}: embedding has {} bytes, expected {}",
                embedding.len(),
                self.config.embedding_bytes()
            )));
        }
        self.entries.write().insert(doc_id, embedding.to_vec());
        Ok(())
    }

    fn remove(&self, doc_id: DocId) -> Result<()> {
        self.entries.write().remove(&doc_id);
        Ok(())
    }

    fn dump(&self, out: &mut dyn Write) -> Result<u64> {
        let entries = self.entries.read();
        write_blob(
            &self.config,
            entries.len(),
            entries.iter().map(|(d, e)| (*d, e.as_slice())),
            out,
        )
    }

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn as_handle(&self) -> &dyn IndexHandle {
        self
    }
}
