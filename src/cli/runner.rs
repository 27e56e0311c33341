//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::SourceConfig;
use crate::connector::OffsetCommitMode;
use crate::error::{Error, Result, ResultExt};
use crate::partition::{Offset, PartitionRegistry, SubtaskInfo, TopicPartition};
use crate::state::{codec, write_atomic, OffsetState, SnapshotStore, SnapshotVersion};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let message = match &self.cli.command {
            Commands::Inspect { snapshot, from } => inspect(snapshot, from.as_deref()).await?,
            Commands::Migrate {
                input,
                output,
                from,
            } => migrate(input, output, from.as_deref()).await?,
            Commands::Assign {
                subtasks,
                index,
                partitions,
            } => assign(*subtasks, *index, partitions)?,
            Commands::Snapshots { dir } => snapshots(dir).await?,
            Commands::Validate { config } => validate(config)?,
        };
        self.output_message(&message);
        Ok(())
    }

    /// Output a message in the selected format
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Decode a snapshot file
async fn inspect(path: &Path, from: Option<&str>) -> Result<Value> {
    let bytes = read_file(path).await?;
    let state = decode(&bytes, from)?;
    let format = match codec::format_version(&bytes)? {
        Some(version) => format!("v{version}"),
        None => "unversioned".to_string(),
    };

    Ok(json!({
        "type": "SNAPSHOT",
        "snapshot": {
            "path": path.display().to_string(),
            "format": format,
            "partitions": state_json(&state),
        }
    }))
}

/// Rewrite a snapshot in the current format
async fn migrate(input: &Path, output: &Path, from: Option<&str>) -> Result<Value> {
    let bytes = read_file(input).await?;
    let state = decode(&bytes, from)?;
    let migrated = state.serialize();
    write_atomic(output, &migrated)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        input = %input.display(),
        output = %output.display(),
        partitions = state.len(),
        "Migrated snapshot"
    );

    Ok(json!({
        "type": "LOG",
        "log": {
            "level": "INFO",
            "message": format!(
                "Migrated {} partitions from {} to {} (format v{})",
                state.len(),
                input.display(),
                output.display(),
                codec::CURRENT_FORMAT_VERSION
            )
        }
    }))
}

/// Partitions owned by one subtask
fn assign(num_subtasks: usize, index: usize, partitions: &[String]) -> Result<Value> {
    let registry = PartitionRegistry::new(SubtaskInfo::new(index, num_subtasks))?;
    let partitions = partitions
        .iter()
        .map(|raw| {
            TopicPartition::parse(raw).ok_or_else(|| {
                Error::invalid_value("partitions", format!("expected topic:partition, got '{raw}'"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let owned = registry.assign(&partitions);

    Ok(json!({
        "type": "ASSIGNMENT",
        "assignment": {
            "subtask": index,
            "num_subtasks": num_subtasks,
            "partitions": owned
                .iter()
                .map(|p| json!({ "topic": p.topic, "partition": p.partition }))
                .collect::<Vec<_>>(),
        }
    }))
}

/// Stored snapshots and the offsets of the latest one
async fn snapshots(dir: &Path) -> Result<Value> {
    let store = SnapshotStore::new(dir);
    let ids = store.list().await?;
    let latest = match store.latest().await? {
        Some((id, bytes)) => {
            let state = OffsetState::deserialize(&bytes)
                .with_context(|| format!("checkpoint {id} in {}", dir.display()))?;
            json!({ "checkpoint_id": id, "partitions": state_json(&state) })
        }
        None => Value::Null,
    };

    Ok(json!({
        "type": "SNAPSHOTS",
        "snapshots": {
            "directory": dir.display().to_string(),
            "checkpoint_ids": ids,
            "latest": latest,
        }
    }))
}

/// Load and validate a source configuration
fn validate(path: &Path) -> Result<Value> {
    let config = SourceConfig::from_file(path)?;
    config.validate()?;
    let commit_mode =
        OffsetCommitMode::from_flags(config.checkpointing_enabled, config.auto_commit_enabled);

    Ok(json!({
        "type": "LOG",
        "log": {
            "level": "INFO",
            "message": format!(
                "Source config is valid (commit mode {commit_mode}, discovery {})",
                config
                    .discovery_interval()
                    .map_or_else(|| "disabled".to_string(), |d| format!("every {}ms", d.as_millis()))
            )
        }
    }))
}

// ============================================================================
// Helpers
// ============================================================================

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(tokio::fs::read(path).await?)
}

fn decode(bytes: &[u8], from: Option<&str>) -> Result<OffsetState> {
    match from {
        Some(release) => codec::deserialize_legacy(bytes, release.parse::<SnapshotVersion>()?),
        None => OffsetState::deserialize(bytes),
    }
}

fn offset_json(offset: Offset) -> Value {
    match offset {
        Offset::Offset(offset) => json!(offset),
        sentinel => json!(sentinel.to_string()),
    }
}

fn state_json(state: &OffsetState) -> Vec<Value> {
    state
        .iter()
        .map(|(partition, offset)| {
            json!({
                "topic": partition.topic,
                "partition": partition.partition,
                "offset": offset_json(*offset),
            })
        })
        .collect()
}
