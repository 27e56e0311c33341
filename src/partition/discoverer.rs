//! Partition discovery
//!
//! Lists the partitions of the subscribed topics and remembers which
//! partitions have already been reported.

use super::types::TopicPartition;
use crate::broker::BrokerClient;
use crate::config::TopicsDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Discoverer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscovererState {
    /// Created, client not connected
    Uninitialized,
    /// Ready to discover
    Open,
    /// Closed, no further discovery
    Closed,
}

impl fmt::Display for DiscovererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscovererState::Uninitialized => "uninitialized",
            DiscovererState::Open => "open",
            DiscovererState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Trait for partition discoverers
#[async_trait]
pub trait PartitionDiscoverer: Send + Sync {
    /// Connect and move to `Open`
    async fn open(&mut self) -> Result<()>;

    /// All partitions of the subscribed topics, sorted and deduplicated
    async fn discover(&mut self) -> Result<Vec<TopicPartition>>;

    /// True the first time `partition` is passed in, false afterwards
    fn validate_and_mark(&mut self, partition: &TopicPartition) -> bool;

    /// Move to `Closed`. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Discoverer backed by a [`BrokerClient`]
pub struct BrokerPartitionDiscoverer<C: BrokerClient> {
    client: Arc<C>,
    topics: TopicsDescriptor,
    pattern: Option<Regex>,
    state: DiscovererState,
    seen: HashSet<TopicPartition>,
}

impl<C: BrokerClient> BrokerPartitionDiscoverer<C> {
    /// Create a discoverer for `topics`
    pub fn new(client: Arc<C>, topics: TopicsDescriptor) -> Self {
        Self {
            client,
            topics,
            pattern: None,
            state: DiscovererState::Uninitialized,
            seen: HashSet::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DiscovererState {
        self.state
    }

    async fn subscribed_topics(&self) -> Result<Vec<String>> {
        match (&self.topics, &self.pattern) {
            (TopicsDescriptor::Topics { topics }, _) => Ok(topics.clone()),
            (TopicsDescriptor::Pattern { .. }, Some(pattern)) => {
                let all = self
                    .client
                    .list_topics()
                    .await
                    .map_err(|e| Error::discovery(format!("failed to list topics: {e}")))?;
                Ok(all.into_iter().filter(|t| pattern.is_match(t)).collect())
            }
            (TopicsDescriptor::Pattern { pattern }, None) => Err(Error::config(format!(
                "topic pattern '{pattern}' was not compiled"
            ))),
        }
    }
}

#[async_trait]
impl<C: BrokerClient + 'static> PartitionDiscoverer for BrokerPartitionDiscoverer<C> {
    async fn open(&mut self) -> Result<()> {
        match self.state {
            DiscovererState::Uninitialized => {
                if let TopicsDescriptor::Pattern { .. } = &self.topics {
                    self.pattern = Some(self.topics.compile_pattern()?);
                }
                self.state = DiscovererState::Open;
                Ok(())
            }
            DiscovererState::Open => Ok(()),
            DiscovererState::Closed => Err(Error::invalid_state("open discoverer", self.state)),
        }
    }

    async fn discover(&mut self) -> Result<Vec<TopicPartition>> {
        if self.state != DiscovererState::Open {
            return Err(Error::invalid_state("discover partitions", self.state));
        }

        let topics = self.subscribed_topics().await?;
        if topics.is_empty() {
            debug!("No subscribed topics found");
            return Ok(Vec::new());
        }

        let mut partitions = self
            .client
            .list_partitions(&topics)
            .await
            .map_err(|e| Error::discovery(format!("failed to list partitions: {e}")))?;
        partitions.retain(|p| topics.contains(&p.topic));
        partitions.sort();
        partitions.dedup();

        debug!(
            topics = topics.len(),
            partitions = partitions.len(),
            "Discovered partitions"
        );
        Ok(partitions)
    }

    fn validate_and_mark(&mut self, partition: &TopicPartition) -> bool {
        self.seen.insert(partition.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = DiscovererState::Closed;
        Ok(())
    }
}
