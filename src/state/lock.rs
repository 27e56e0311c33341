//! The checkpoint lock
//!
//! Wraps exactly the `OffsetState`. Emitting a record together with
//! advancing its offset, copying the state for a snapshot, and inserting
//! discovered partitions all happen while holding it. It is never held
//! across a broker call.

use super::types::OffsetState;
use crate::partition::{Offset, TopicPartition};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Shared, lock-protected offset state
#[derive(Debug, Clone, Default)]
pub struct CheckpointLock {
    state: Arc<Mutex<OffsetState>>,
}

impl CheckpointLock {
    /// Wrap an initial state
    pub fn new(state: OffsetState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Acquire the lock
    ///
    /// Everything done through the guard is atomic with respect to
    /// snapshots.
    pub async fn lock(&self) -> MutexGuard<'_, OffsetState> {
        self.state.lock().await
    }

    /// Point-in-time copy of the state
    pub async fn snapshot(&self) -> OffsetState {
        self.state.lock().await.clone()
    }

    /// Tracked partitions in order
    pub async fn partitions(&self) -> Vec<TopicPartition> {
        self.state.lock().await.partitions()
    }

    /// Insert partitions that are not tracked yet, at `offset`
    ///
    /// Existing entries are left untouched. Returns the partitions added.
    pub async fn add_partitions(
        &self,
        partitions: impl IntoIterator<Item = TopicPartition>,
        offset: Offset,
    ) -> Vec<TopicPartition> {
        let mut state = self.state.lock().await;
        let added: Vec<TopicPartition> = partitions
            .into_iter()
            .filter(|p| state.add_if_absent(p.clone(), offset))
            .collect();
        if !added.is_empty() {
            debug!(count = added.len(), %offset, "Added partitions to offset state");
        }
        added
    }
}
