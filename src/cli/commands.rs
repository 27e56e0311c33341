//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Solidafy log source CLI
#[derive(Parser, Debug)]
#[command(name = "solidafy-logsource")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a snapshot file and print its offsets
    Inspect {
        /// Snapshot file
        snapshot: PathBuf,

        /// Release that wrote the snapshot (e.g. v0.2); detected when omitted
        #[arg(long)]
        from: Option<String>,
    },

    /// Rewrite a snapshot in the current format
    Migrate {
        /// Snapshot file to read
        input: PathBuf,

        /// Destination file
        output: PathBuf,

        /// Release that wrote the input snapshot; detected when omitted
        #[arg(long)]
        from: Option<String>,
    },

    /// Show which partitions a subtask owns
    Assign {
        /// Number of parallel subtasks
        #[arg(long)]
        subtasks: usize,

        /// Index of the subtask
        #[arg(long)]
        index: usize,

        /// Partitions as topic:partition
        #[arg(required = true)]
        partitions: Vec<String>,
    },

    /// List the snapshots in a snapshot directory
    Snapshots {
        /// Snapshot directory
        dir: PathBuf,
    },

    /// Validate a source configuration file (YAML or JSON)
    Validate {
        /// Configuration file
        config: PathBuf,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Pretty,
}
