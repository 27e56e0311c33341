//! Broker client interface
//!
//! The log source never speaks the broker protocol itself. It drives a
//! `BrokerClient` implementation supplied by the embedding application.
//!
//! # Overview
//!
//! - `BrokerClient` - metadata, offset resolution, polling and commits
//! - `Record` - a raw record as returned by a poll
//! - `MemoryBroker` - in-memory broker with failure injection

mod memory;

pub use memory::MemoryBroker;

use crate::error::Result;
use crate::partition::{Offset, TopicPartition};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;

/// A raw record read from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition the record was read from
    pub partition: TopicPartition,
    /// Offset of the record within its partition
    pub offset: i64,
    /// Optional record key
    pub key: Option<Bytes>,
    /// Record payload
    pub payload: Bytes,
    /// Broker timestamp in milliseconds, if any
    pub timestamp: Option<i64>,
}

impl Record {
    /// Create a record without key or timestamp
    pub fn new(partition: TopicPartition, offset: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            partition,
            offset,
            key: None,
            payload: payload.into(),
            timestamp: None,
        }
    }
}

/// Client for a partitioned, offset-addressed log broker
///
/// Errors returned by `poll` are classified with [`crate::Error::is_retryable`]:
/// retryable errors are retried in place, everything else fails the task.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Names of all topics on the broker
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// All partitions of the given topics
    async fn list_partitions(&self, topics: &[String]) -> Result<Vec<TopicPartition>>;

    /// Resolve a sentinel to the position of the next record to read
    async fn resolve_offset(&self, partition: &TopicPartition, sentinel: Offset) -> Result<i64>;

    /// Read records starting at `position`, waiting at most `timeout`
    async fn poll(
        &self,
        partition: &TopicPartition,
        position: i64,
        timeout: Duration,
    ) -> Result<Vec<Record>>;

    /// Commit next-to-read positions for the consumer group
    async fn commit_offsets(&self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<()>;

    /// Release client resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
