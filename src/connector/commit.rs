//! Offset commit mode and pending checkpoint bookkeeping

use crate::partition::TopicPartition;
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of snapshots awaiting completion
pub const MAX_PENDING_CHECKPOINTS: usize = 100;

/// How consumed offsets are committed back to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetCommitMode {
    /// Never commit
    Disabled,
    /// Commit the offsets of a snapshot once its checkpoint completes
    OnCheckpoints,
    /// Leave committing to the broker client's own timer
    KafkaPeriodic,
}

impl OffsetCommitMode {
    /// Pick the mode from the checkpointing and auto-commit flags
    pub fn from_flags(checkpointing_enabled: bool, auto_commit_enabled: bool) -> Self {
        if checkpointing_enabled {
            Self::OnCheckpoints
        } else if auto_commit_enabled {
            Self::KafkaPeriodic
        } else {
            Self::Disabled
        }
    }
}

impl fmt::Display for OffsetCommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "disabled",
            Self::OnCheckpoints => "on_checkpoints",
            Self::KafkaPeriodic => "kafka_periodic",
        };
        f.write_str(name)
    }
}

/// Offsets of snapshots whose checkpoints have not completed yet
#[derive(Debug, Default)]
pub struct PendingCheckpoints {
    entries: BTreeMap<u64, BTreeMap<TopicPartition, i64>>,
}

impl PendingCheckpoints {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the offsets of a snapshot, evicting the oldest when full
    pub fn insert(&mut self, checkpoint_id: u64, offsets: BTreeMap<TopicPartition, i64>) {
        self.entries.insert(checkpoint_id, offsets);
        while self.entries.len() > MAX_PENDING_CHECKPOINTS {
            self.entries.pop_first();
        }
    }

    /// Take the offsets of a completed checkpoint
    ///
    /// Older checkpoints are subsumed and dropped as well. Unknown ids
    /// leave the set untouched.
    pub fn complete(&mut self, checkpoint_id: u64) -> Option<BTreeMap<TopicPartition, i64>> {
        if !self.entries.contains_key(&checkpoint_id) {
            return None;
        }
        let mut newer = self.entries.split_off(&checkpoint_id);
        let offsets = newer.remove(&checkpoint_id);
        self.entries = newer;
        offsets
    }

    /// Pending checkpoint ids in order
    pub fn ids(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    /// Number of pending checkpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(offset: i64) -> BTreeMap<TopicPartition, i64> {
        [(TopicPartition::new("abc", 0), offset)].into_iter().collect()
    }

    #[test]
    fn test_commit_mode_from_flags() {
        assert_eq!(
            OffsetCommitMode::from_flags(true, true),
            OffsetCommitMode::OnCheckpoints
        );
        assert_eq!(
            OffsetCommitMode::from_flags(true, false),
            OffsetCommitMode::OnCheckpoints
        );
        assert_eq!(
            OffsetCommitMode::from_flags(false, true),
            OffsetCommitMode::KafkaPeriodic
        );
        assert_eq!(
            OffsetCommitMode::from_flags(false, false),
            OffsetCommitMode::Disabled
        );
    }

    #[test]
    fn test_complete_drops_older_checkpoints() {
        let mut pending = PendingCheckpoints::new();
        pending.insert(1, offsets(10));
        pending.insert(2, offsets(20));
        pending.insert(3, offsets(30));

        assert_eq!(pending.complete(2), Some(offsets(20)));
        assert_eq!(pending.ids(), vec![3]);
    }

    #[test]
    fn test_complete_unknown_id_is_ignored() {
        let mut pending = PendingCheckpoints::new();
        pending.insert(5, offsets(10));

        assert_eq!(pending.complete(4), None);
        assert_eq!(pending.complete(6), None);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_pending_is_bounded() {
        let mut pending = PendingCheckpoints::new();
        for id in 0..150 {
            pending.insert(id, offsets(id as i64));
        }

        assert_eq!(pending.len(), MAX_PENDING_CHECKPOINTS);
        assert_eq!(pending.ids().first(), Some(&50));
        assert_eq!(pending.complete(10), None);
    }
}
