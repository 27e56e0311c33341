//! Partition ownership across parallel subtasks
//!
//! Every subtask applies the same pure function to the broker-reported
//! partition list, so identical metadata always yields identical ownership.

use super::types::TopicPartition;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Index of this subtask and the total subtask count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskInfo {
    /// Index of this subtask, `0..num_subtasks`
    pub index: usize,
    /// Number of parallel subtasks
    pub num_subtasks: usize,
}

impl SubtaskInfo {
    /// Create subtask info
    pub fn new(index: usize, num_subtasks: usize) -> Self {
        Self {
            index,
            num_subtasks,
        }
    }

    /// A single subtask owning everything
    pub fn single() -> Self {
        Self::new(0, 1)
    }
}

/// Deterministic partition-to-subtask assignment
#[derive(Debug, Clone, Copy)]
pub struct PartitionRegistry {
    subtask: SubtaskInfo,
}

impl PartitionRegistry {
    /// Create a registry for the given subtask
    pub fn new(subtask: SubtaskInfo) -> Result<Self> {
        if subtask.num_subtasks == 0 {
            return Err(Error::invalid_value(
                "num_subtasks",
                "must be greater than zero",
            ));
        }
        if subtask.index >= subtask.num_subtasks {
            return Err(Error::invalid_value(
                "subtask_index",
                format!(
                    "index {} out of range for {} subtasks",
                    subtask.index, subtask.num_subtasks
                ),
            ));
        }
        Ok(Self { subtask })
    }

    /// Subtask this registry assigns for
    pub fn subtask(&self) -> SubtaskInfo {
        self.subtask
    }

    /// Index of the subtask that owns `partition`
    ///
    /// Partitions of a topic are handed out round-robin, starting at a
    /// subtask derived from the topic name.
    pub fn owner_of(&self, partition: &TopicPartition) -> usize {
        owner_of(partition, self.subtask.num_subtasks)
    }

    /// Whether this subtask owns `partition`
    pub fn is_owned(&self, partition: &TopicPartition) -> bool {
        self.owner_of(partition) == self.subtask.index
    }

    /// The sorted, deduplicated subset of `partitions` this subtask owns
    pub fn assign(&self, partitions: &[TopicPartition]) -> Vec<TopicPartition> {
        let mut owned: Vec<TopicPartition> = partitions
            .iter()
            .filter(|p| self.is_owned(p))
            .cloned()
            .collect();
        owned.sort();
        owned.dedup();
        owned
    }
}

/// Owner index of `partition` among `num_subtasks` subtasks
pub fn owner_of(partition: &TopicPartition, num_subtasks: usize) -> usize {
    let n = num_subtasks.max(1) as i64;
    let start = i64::from(topic_hash(&partition.topic).wrapping_mul(31) & 0x7FFF_FFFF) % n;
    // partition indexes are non-negative in practice; rem_euclid keeps a bad one in range
    ((start + i64::from(partition.partition)).rem_euclid(n)) as usize
}

/// Platform-independent string hash (`s[0]*31^(n-1) + ... + s[n-1]` over UTF-16 units)
fn topic_hash(topic: &str) -> i32 {
    topic
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
