//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, VecSegArgs};
use crate::error::Result;
use crate::segment::merger::MergeStats;

/// One sub-index of an inspected segment.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubIndexSummary {
    pub sub_index_id: u64,
    pub doc_count: u64,
    pub builder: String,
    pub searcher: String,
    pub blob_bytes: u64,
    pub has_embeddings: bool,
}

/// Result structure for `inspect`.
#[derive(Debug, Serialize, Deserialize)]
pub struct InspectResult {
    pub path: String,
    pub kind: String,
    pub version: u32,
    pub doc_count: u64,
    pub total_bytes: u64,
    pub dimension: usize,
    pub element_type: String,
    pub distance_metric: String,
    pub is_merged: bool,
    pub parallel_parts: usize,
    pub created_at: String,
    pub sub_indices: Vec<SubIndexSummary>,
}

/// Result structure for `verify`.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResult {
    pub path: String,
    pub ok: bool,
    pub sub_indices: u64,
    pub primary_keys: u64,
    pub embeddings: u64,
    pub blob_bytes: u64,
    pub searchers_opened: bool,
    pub problems: Vec<String>,
}

/// Result structure for `merge`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MergeResult {
    pub output: String,
    pub inputs: Vec<String>,
    pub doc_count: u64,
    pub sub_indices: Vec<u64>,
    pub stats: MergeStats,
}

/// Print a command result in the selected format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &VecSegArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &VecSegArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    for line in human_lines(&value, 0) {
        println!("{line}");
    }
    Ok(())
}

/// Render an object as `key: value` lines, nesting objects and arrays of
/// objects with indentation.
fn human_lines(value: &serde_json::Value, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    let mut lines = Vec::new();
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) => {
                        lines.push(format!("{indent}{key}:"));
                        lines.extend(human_lines(val, depth + 1));
                    }
                    serde_json::Value::Array(items) if items.iter().any(|i| i.is_object()) => {
                        lines.push(format!("{indent}{key}:"));
                        for item in items {
                            lines.push(format!("{indent}  -"));
                            lines.extend(human_lines(item, depth + 2));
                        }
                    }
                    _ => lines.push(format!("{indent}{key}: {}", format_value(val))),
                }
            }
        }
        _ => lines.push(format!("{indent}{}", format_value(value))),
    }
    lines
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &VecSegArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a JSON value for display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}
