//! Command line argument parsing for the vecseg CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::vector::core::doc::SubIndexId;

/// vecseg - inspect, verify and merge vector index segments
#[derive(Parser, Debug, Clone)]
#[command(name = "vecseg")]
#[command(about = "Inspect, verify and merge vector index segments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct VecSegArgs {
    /// Verbosity level (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl VecSegArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }

    /// Default `tracing` filter directive for the verbosity level.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity() {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the metadata of a segment directory
    Inspect(InspectArgs),

    /// Check blob checksums and primary-key counts of a segment directory
    Verify(VerifyArgs),

    /// Merge segment directories into a new segment
    Merge(MergeArgs),
}

/// Arguments for inspecting a segment
#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    /// Path to the segment directory
    #[arg(value_name = "SEGMENT_DIR")]
    pub segment_dir: PathBuf,

    /// Read segment files through a memory map
    #[arg(long)]
    pub mmap: bool,
}

/// Arguments for verifying a segment
#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    /// Path to the segment directory
    #[arg(value_name = "SEGMENT_DIR")]
    pub segment_dir: PathBuf,

    /// Index configuration (JSON); when given, searchers are opened as well
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

/// Arguments for merging segments
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Input segment directories, in doc-id order
    #[arg(value_name = "SEGMENT_DIR", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Output segment directory
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    pub output: PathBuf,

    /// Index configuration (JSON); defaults to the layout of the first input
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Sub-indices to merge (default: all)
    #[arg(long, value_delimiter = ',')]
    pub sub_indices: Option<Vec<SubIndexId>>,

    /// Merge every selected sub-index into this one
    #[arg(long, value_name = "SUB_INDEX_ID")]
    pub compact_into: Option<SubIndexId>,

    /// Overwrite an existing output segment
    #[arg(long)]
    pub force: bool,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_args() {
        let args = VecSegArgs::try_parse_from(["vecseg", "inspect", "/data/seg_0", "--mmap"]).unwrap();
        if let Command::Inspect(inspect) = args.command {
            assert_eq!(inspect.segment_dir, PathBuf::from("/data/seg_0"));
            assert!(inspect.mmap);
        } else {
            panic!("Expected Inspect command");
        }
    }

    #[test]
    fn test_merge_args() {
        let args = VecSegArgs::try_parse_from([
            "vecseg",
            "merge",
            "/data/a",
            "/data/b",
            "-o",
            "/data/out",
            "--sub-indices",
            "1,2,3",
            "--compact-into",
            "9",
        ])
        .unwrap();
        if let Command::Merge(merge) = args.command {
            assert_eq!(merge.inputs.len(), 2);
            assert_eq!(merge.output, PathBuf::from("/data/out"));
            assert_eq!(merge.sub_indices, Some(vec![1, 2, 3]));
            assert_eq!(merge.compact_into, Some(9));
            assert!(!merge.force);
        } else {
            panic!("Expected Merge command");
        }
    }

    #[test]
    fn test_merge_requires_inputs() {
        assert!(VecSegArgs::try_parse_from(["vecseg", "merge", "-o", "/data/out"]).is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        let args = VecSegArgs::try_parse_from(["vecseg", "verify", "seg"]).unwrap();
        assert_eq!(args.verbosity(), 1);
        assert_eq!(args.log_level(), "warn");

        let args = VecSegArgs::try_parse_from(["vecseg", "-vvv", "verify", "seg"]).unwrap();
        assert_eq!(args.log_level(), "debug");

        let args = VecSegArgs::try_parse_from(["vecseg", "-q", "-vv", "verify", "seg"]).unwrap();
        assert_eq!(args.verbosity(), 0);
        assert_eq!(args.log_level(), "error");
    }

    #[test]
    fn test_output_format() {
        let args = VecSegArgs::try_parse_from(["vecseg", "--format", "json", "inspect", "seg"]).unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
    }
}
