//! Partition and offset types
//!
//! Defines the identity of a partition and the offset values tracked for it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single partition of a topic
///
/// Ordered by topic, then partition index, so maps keyed by it iterate
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition index within the topic
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic partition
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Parse `topic:partition`
    pub fn parse(s: &str) -> Option<Self> {
        let (topic, partition) = s.rsplit_once(':')?;
        if topic.is_empty() {
            return None;
        }
        Some(Self::new(topic, partition.parse().ok()?))
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Offset of a partition
///
/// `Offset(n)` is the offset of the last record delivered downstream.
/// The sentinels stand for positions the broker resolves on first read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Last delivered offset
    Offset(i64),
    /// Start from the earliest retained record
    Earliest,
    /// Start after the latest record at resolution time
    Latest,
    /// Start from the consumer group's committed offset
    GroupOffset,
}

impl Offset {
    /// Stored value of `Earliest`
    pub const EARLIEST_VALUE: i64 = -915_623_761_775;
    /// Stored value of `Latest`
    pub const LATEST_VALUE: i64 = -915_623_761_774;
    /// Stored value of `GroupOffset`
    pub const GROUP_OFFSET_VALUE: i64 = -915_623_761_773;

    /// Whether this offset still has to be resolved by the broker
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Offset::Offset(_))
    }

    /// The concrete offset, if resolved
    pub fn concrete(&self) -> Option<i64> {
        match self {
            Offset::Offset(offset) => Some(*offset),
            _ => None,
        }
    }

    /// Encode as the 64-bit value stored in snapshots
    pub fn to_raw(self) -> i64 {
        match self {
            Offset::Offset(offset) => offset,
            Offset::Earliest => Self::EARLIEST_VALUE,
            Offset::Latest => Self::LATEST_VALUE,
            Offset::GroupOffset => Self::GROUP_OFFSET_VALUE,
        }
    }

    /// Decode a stored 64-bit value
    ///
    /// Returns `None` for negative values that are neither `-1` (nothing
    /// consumed before position 0) nor a sentinel.
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            Self::EARLIEST_VALUE => Some(Offset::Earliest),
            Self::LATEST_VALUE => Some(Offset::Latest),
            Self::GROUP_OFFSET_VALUE => Some(Offset::GroupOffset),
            n if n >= -1 => Some(Offset::Offset(n)),
            _ => None,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Offset(offset) => write!(f, "{offset}"),
            Offset::Earliest => f.write_str("EARLIEST"),
            Offset::Latest => f.write_str("LATEST"),
            Offset::GroupOffset => f.write_str("GROUP_OFFSET"),
        }
    }
}
