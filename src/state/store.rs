//! File-based snapshot store
//!
//! Keeps one file per checkpoint id under a directory, written atomically.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_EXTENSION: &str = "bin";

/// Directory of snapshot files named `snapshot-<checkpoint_id>.bin`
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the snapshots
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot for `checkpoint_id`
    pub fn path_for(&self, checkpoint_id: u64) -> PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{checkpoint_id}.{SNAPSHOT_EXTENSION}"))
    }

    /// Persist snapshot bytes for `checkpoint_id`
    pub async fn save(&self, checkpoint_id: u64, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(checkpoint_id);
        write_atomic(&path, bytes).await?;
        debug!(checkpoint_id, path = %path.display(), "Saved snapshot");
        Ok(path)
    }

    /// Read the snapshot for `checkpoint_id`
    pub async fn load(&self, checkpoint_id: u64) -> Result<Bytes> {
        let path = self.path_for(checkpoint_id);
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(Bytes::from(tokio::fs::read(&path).await?))
    }

    /// Checkpoint ids with a stored snapshot, ascending
    pub async fn list(&self) -> Result<Vec<u64>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(SNAPSHOT_PREFIX))
                .and_then(|n| n.strip_suffix(SNAPSHOT_EXTENSION))
                .and_then(|n| n.strip_suffix('.'))
                .and_then(|n| n.parse().ok())
            else {
                continue;
            };
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// The snapshot with the highest checkpoint id, if any
    pub async fn latest(&self) -> Result<Option<(u64, Bytes)>> {
        match self.list().await?.last() {
            Some(&id) => Ok(Some((id, self.load(id).await?))),
            None => Ok(None),
        }
    }
}

/// Write to a temp file first, then rename for atomicity
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, bytes).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
