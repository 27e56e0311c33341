//! In-memory broker
//!
//! Holds topics as vectors of payloads and supports queued failures, so the
//! fetch loop and discovery can be driven without a real cluster.

use super::{BrokerClient, Record};
use crate::error::{Error, Result};
use crate::partition::{Offset, TopicPartition};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    /// Per topic, per partition record payloads; offset == index
    topics: BTreeMap<String, Vec<Vec<Bytes>>>,
    committed: BTreeMap<TopicPartition, i64>,
    metadata_failures: VecDeque<Error>,
    poll_failures: VecDeque<Error>,
    commit_failures: VecDeque<Error>,
    poll_count: usize,
    commit_count: usize,
    closed: bool,
}

/// In-memory broker implementing [`BrokerClient`]
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    max_batch: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_batch: 100,
        }
    }

    /// Limit the number of records returned per poll
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Create a topic, or grow it to `partitions` partitions
    pub async fn create_topic(&self, topic: &str, partitions: usize) {
        let mut inner = self.inner.lock().await;
        let logs = inner.topics.entry(topic.to_string()).or_default();
        if logs.len() < partitions {
            logs.resize_with(partitions, Vec::new);
        }
    }

    /// Append payloads to a partition, creating it if needed
    pub async fn append<I, B>(&self, partition: &TopicPartition, payloads: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut inner = self.inner.lock().await;
        let logs = inner.topics.entry(partition.topic.clone()).or_default();
        let index = partition.partition.max(0) as usize;
        if logs.len() <= index {
            logs.resize_with(index + 1, Vec::new);
        }
        logs[index].extend(payloads.into_iter().map(Into::into));
    }

    /// Fail the next metadata request with `error`
    pub async fn fail_next_metadata(&self, error: Error) {
        self.inner.lock().await.metadata_failures.push_back(error);
    }

    /// Fail the next poll with `error`
    pub async fn fail_next_poll(&self, error: Error) {
        self.inner.lock().await.poll_failures.push_back(error);
    }

    /// Fail the next commit with `error`
    pub async fn fail_next_commit(&self, error: Error) {
        self.inner.lock().await.commit_failures.push_back(error);
    }

    /// Set the committed group offset of a partition
    pub async fn set_committed(&self, partition: &TopicPartition, position: i64) {
        self.inner
            .lock()
            .await
            .committed
            .insert(partition.clone(), position);
    }

    /// Committed group offsets
    pub async fn committed(&self) -> BTreeMap<TopicPartition, i64> {
        self.inner.lock().await.committed.clone()
    }

    /// Number of polls served
    pub async fn poll_count(&self) -> usize {
        self.inner.lock().await.poll_count
    }

    /// Number of successful commits
    pub async fn commit_count(&self) -> usize {
        self.inner.lock().await.commit_count
    }

    /// Whether `close` was called
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    fn log_len(inner: &Inner, partition: &TopicPartition) -> Option<i64> {
        let logs = inner.topics.get(&partition.topic)?;
        let log = logs.get(usize::try_from(partition.partition).ok()?)?;
        Some(log.len() as i64)
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        if let Some(error) = inner.metadata_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.topics.keys().cloned().collect())
    }

    async fn list_partitions(&self, topics: &[String]) -> Result<Vec<TopicPartition>> {
        let mut inner = self.inner.lock().await;
        if let Some(error) = inner.metadata_failures.pop_front() {
            return Err(error);
        }
        Ok(topics
            .iter()
            .filter_map(|topic| inner.topics.get(topic).map(|logs| (topic, logs.len())))
            .flat_map(|(topic, count)| (0..count).map(move |p| TopicPartition::new(topic, p as i32)))
            .collect())
    }

    async fn resolve_offset(&self, partition: &TopicPartition, sentinel: Offset) -> Result<i64> {
        let inner = self.inner.lock().await;
        let len = Self::log_len(&inner, partition)
            .ok_or_else(|| Error::poll(&partition.topic, partition.partition, -1, "unknown partition"))?;
        Ok(match sentinel {
            Offset::Earliest => 0,
            Offset::Latest => len,
            Offset::GroupOffset => inner.committed.get(partition).copied().unwrap_or(0),
            Offset::Offset(last) => last + 1,
        })
    }

    async fn poll(
        &self,
        partition: &TopicPartition,
        position: i64,
        timeout: Duration,
    ) -> Result<Vec<Record>> {
        let records = {
            let mut inner = self.inner.lock().await;
            inner.poll_count += 1;
            if let Some(error) = inner.poll_failures.pop_front() {
                return Err(error);
            }
            let log = usize::try_from(partition.partition)
                .ok()
                .and_then(|index| inner.topics.get(&partition.topic)?.get(index))
                .ok_or_else(|| {
                    Error::poll(&partition.topic, partition.partition, position, "unknown partition")
                })?;
            let start = position.max(0) as usize;
            log.iter()
                .enumerate()
                .skip(start)
                .take(self.max_batch)
                .map(|(offset, payload)| Record::new(partition.clone(), offset as i64, payload.clone()))
                .collect::<Vec<_>>()
        };

        if records.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(records)
    }

    async fn commit_offsets(&self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(error) = inner.commit_failures.pop_front() {
            return Err(error);
        }
        inner
            .committed
            .extend(offsets.iter().map(|(p, o)| (p.clone(), *o)));
        inner.commit_count += 1;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.lock().await.closed = true;
        Ok(())
    }
}
