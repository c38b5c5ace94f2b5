//! Command implementations for the vecseg CLI.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{Result, VecSegError};
use crate::segment::NormalSegment;
use crate::segment::data_io::SegmentDataReader;
use crate::segment::deletion::DeletionMap;
use crate::segment::merger::{MergeSource, MergeTask, SegmentMerger};
use crate::segment::meta::{SEGMENT_META_FILE, SegmentMeta};
use crate::storage::file::FileStorageConfig;
use crate::storage::{Storage, StorageConfig, StorageFactory};
use crate::vector::config::IndexConfig;
use crate::vector::core::doc::{DocId, SubIndexId};
use crate::vector::engine::registry::EngineRegistry;

/// Execute a CLI command.
pub fn execute_command(args: VecSegArgs) -> Result<()> {
    match &args.command {
        Command::Inspect(inspect_args) => inspect_segment(inspect_args, &args),
        Command::Verify(verify_args) => verify_segment(verify_args, &args),
        Command::Merge(merge_args) => merge_segments(merge_args, &args),
    }
}

fn open_storage(path: &Path, use_mmap: bool) -> Result<Arc<dyn Storage>> {
    let mut config = FileStorageConfig::new(path);
    config.use_mmap = use_mmap;
    StorageFactory::create(StorageConfig::File(config))
}

fn open_reader(path: &Path, use_mmap: bool) -> Result<(Arc<dyn Storage>, SegmentDataReader)> {
    if !path.is_dir() {
        return Err(VecSegError::not_found(format!(
            "segment directory {} does not exist",
            path.display()
        )));
    }
    let storage = open_storage(path, use_mmap)?;
    let reader = SegmentDataReader::open(Arc::clone(&storage))?;
    Ok((storage, reader))
}

/// Print segment metadata.
fn inspect_segment(args: &InspectArgs, cli_args: &VecSegArgs) -> Result<()> {
    let (_, reader) = open_reader(&args.segment_dir, args.mmap)?;
    let meta = reader.meta();
    let result = InspectResult {
        path: args.segment_dir.display().to_string(),
        kind: format!("{:?}", meta.kind).to_lowercase(),
        version: meta.version,
        doc_count: meta.doc_count,
        total_bytes: meta.total_bytes,
        dimension: meta.dimension,
        element_type: meta.element_type.name().to_string(),
        distance_metric: meta.distance_metric.name().to_string(),
        is_merged: meta.is_merged,
        parallel_parts: reader.part_count(),
        created_at: meta.created_at.to_rfc3339(),
        sub_indices: meta
            .sub_indices
            .iter()
            .map(|(id, sub)| SubIndexSummary {
                sub_index_id: *id,
                doc_count: sub.doc_count,
                builder: sub.builder_name.clone(),
                searcher: sub.searcher_name.clone(),
                blob_bytes: sub.build_stats.dumped_bytes,
                has_embeddings: sub.has_embeddings,
            })
            .collect(),
    };
    output_result("Segment metadata", &result, cli_args)
}

/// Cross-check checksums, primary keys, embeddings and metadata counts.
fn check_segment(reader: &SegmentDataReader) -> Result<VerifyResult> {
    let report = reader.verify()?;
    let mut problems = Vec::new();
    for (sub_index_id, sub) in &reader.meta().sub_indices {
        let keys = reader.read_primary_keys(*sub_index_id)?.len() as u64;
        if keys != sub.doc_count {
            problems.push(format!(
                "sub-index {sub_index_id}: {keys} primary keys, metadata records {}",
                sub.doc_count
            ));
        }
        if sub.has_embeddings != reader.has_embeddings(*sub_index_id) {
            problems.push(format!(
                "sub-index {sub_index_id}: embedding stream presence disagrees with metadata"
            ));
        } else if sub.has_embeddings {
            let mut embeddings = 0u64;
            reader.for_each_embedding(*sub_index_id, &mut |_, _| {
                embeddings += 1;
                Ok(())
            })?;
            if embeddings != sub.doc_count {
                problems.push(format!(
                    "sub-index {sub_index_id}: {embeddings} stored embeddings, metadata records {}",
                    sub.doc_count
                ));
            }
        }
    }
    Ok(VerifyResult {
        path: String::new(),
        ok: problems.is_empty(),
        sub_indices: report.sub_indices,
        primary_keys: report.primary_keys,
        embeddings: report.embeddings,
        blob_bytes: report.blob_bytes,
        searchers_opened: false,
        problems,
    })
}

/// Verify a segment directory.
fn verify_segment(args: &VerifyArgs, cli_args: &VecSegArgs) -> Result<()> {
    let (storage, reader) = open_reader(&args.segment_dir, false)?;
    let mut result = check_segment(&reader)?;
    result.path = args.segment_dir.display().to_string();

    if let Some(config_path) = &args.config {
        let config = IndexConfig::from_file(config_path)?;
        let registry = EngineRegistry::with_defaults();
        match NormalSegment::open(
            result.path.clone(),
            storage,
            &config,
            &registry,
            0,
            Arc::new(DeletionMap::new()),
        ) {
            Ok(_) => result.searchers_opened = true,
            Err(e) => result
                .problems
                .push(format!("searchers failed to open: {e}")),
        }
    }
    result.ok = result.problems.is_empty();

    output_result("Segment verification", &result, cli_args)?;
    if result.ok {
        Ok(())
    } else {
        Err(VecSegError::consistency(format!(
            "segment {} failed verification with {} problem(s)",
            result.path,
            result.problems.len()
        )))
    }
}

/// One past the highest doc-id used by any sub-index of the segment.
fn doc_id_span(reader: &SegmentDataReader) -> Result<DocId> {
    let mut span: DocId = 0;
    for sub_index_id in reader.sub_index_ids() {
        for (_, doc_id) in reader.read_primary_keys(sub_index_id)? {
            span = span.max(doc_id.saturating_add(1));
        }
    }
    Ok(span)
}

fn config_from_meta(meta: &SegmentMeta) -> Result<IndexConfig> {
    IndexConfig::builder()
        .dimension(meta.dimension)
        .element_type(meta.element_type)
        .distance_metric(meta.distance_metric)
        .build()
}

/// Merge segment directories, concatenating their doc-id ranges.
fn merge_segments(args: &MergeArgs, cli_args: &VecSegArgs) -> Result<()> {
    if args.output.join(SEGMENT_META_FILE).exists() && !args.force {
        return Err(VecSegError::invalid_operation(format!(
            "{} already holds a segment. Use --force to overwrite.",
            args.output.display()
        )));
    }

    let mut readers = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let (_, reader) = open_reader(input, false)?;
        readers.push(Arc::new(reader));
    }
    let Some(first) = readers.first() else {
        return Err(VecSegError::invalid_operation("no input segment given"));
    };
    let config = match &args.config {
        Some(path) => IndexConfig::from_file(path)?,
        None => config_from_meta(first.meta())?,
    };

    let mut sources = Vec::with_capacity(readers.len());
    let mut base: DocId = 0;
    for (input, reader) in args.inputs.iter().zip(&readers) {
        let span = doc_id_span(reader)?;
        debug!(segment = %input.display(), base_doc_id = base, span, "merge input");
        sources.push(MergeSource::new(
            input.display().to_string(),
            Arc::clone(reader),
            base,
        ));
        base = base.checked_add(span).ok_or_else(|| {
            VecSegError::invalid_operation("merged doc-id range exceeds the doc-id space")
        })?;
    }

    let sub_index_ids: Vec<SubIndexId> = match &args.sub_indices {
        Some(ids) => ids.clone(),
        None => {
            let mut ids: Vec<SubIndexId> = readers.iter().flat_map(|r| r.sub_index_ids()).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        }
    };
    let task = match args.compact_into {
        Some(target) => MergeTask::compact(sub_index_ids, target),
        None => MergeTask::new(sub_index_ids),
    };

    let output = open_storage(&args.output, false)?;
    let merger = SegmentMerger::new(Arc::new(config), Arc::new(EngineRegistry::with_defaults()));
    let outcome = merger.merge(&sources, &task, output)?;
    info!(
        output = %args.output.display(),
        docs = outcome.stats.docs_merged,
        elapsed_millis = outcome.stats.elapsed_millis,
        "segments merged"
    );

    let result = MergeResult {
        output: args.output.display().to_string(),
        inputs: args.inputs.iter().map(|p| p.display().to_string()).collect(),
        doc_count: outcome.meta.doc_count,
        sub_indices: outcome.meta.sub_indices.keys().copied().collect(),
        stats: outcome.stats,
    };
    output_result("Segments merged", &result, cli_args)
}
