//! CLI module
//!
//! Command-line tools for snapshots and partition assignment.
//!
//! # Commands
//!
//! - `inspect` - Decode a snapshot file
//! - `migrate` - Rewrite a legacy snapshot in the current format
//! - `assign` - Show the partitions a subtask owns
//! - `snapshots` - List the snapshots in a directory
//! - `validate` - Check a source configuration file

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
