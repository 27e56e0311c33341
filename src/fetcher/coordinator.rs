//! Fetch loop implementation
//!
//! Each batch polls every tracked partition concurrently, then emits the
//! returned records partition by partition. Every emitted record and the
//! offset advance that goes with it happen under the checkpoint lock, so a
//! snapshot always sees both or neither.

use crate::broker::{BrokerClient, Record};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::partition::{Offset, TopicPartition};
use crate::state::{CheckpointLock, OffsetState};
use crate::types::BackoffConfig;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Configuration for the fetch loop
#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    /// Upper bound for a single poll
    pub poll_timeout: Duration,
    /// Backoff for transient poll failures
    pub backoff: BackoffConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&SourceConfig> for FetcherConfig {
    fn from(config: &SourceConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            backoff: config.backoff,
        }
    }
}

/// Drives record delivery for the partitions in an offset state
#[async_trait]
pub trait FetchCoordinator: Send + Sync {
    /// Run until cancelled or a fatal error
    async fn run(&self, emit: &mut (dyn FnMut(Record) + Send)) -> Result<()>;

    /// Point-in-time copy of the offsets of all emitted records
    async fn snapshot_current_state(&self) -> OffsetState;

    /// Stop the loop after the current batch. Idempotent.
    fn cancel(&self);

    /// Whether `cancel` was called
    fn is_cancelled(&self) -> bool;

    /// The checkpoint lock guarding this fetcher's offset state
    fn checkpoint_lock(&self) -> &CheckpointLock;

    /// Commit "last delivered" offsets to the broker
    async fn commit_offsets(&self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<()>;

    /// Release the broker client
    async fn close(&self) -> Result<()>;
}

/// Fetcher polling a [`BrokerClient`]
pub struct BrokerFetcher<C: BrokerClient> {
    client: Arc<C>,
    state: CheckpointLock,
    config: FetcherConfig,
    cancelled: watch::Sender<bool>,
}

impl<C: BrokerClient + 'static> BrokerFetcher<C> {
    /// Create a fetcher over `state`
    pub fn new(client: Arc<C>, state: CheckpointLock, config: FetcherConfig) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            client,
            state,
            config,
            cancelled,
        }
    }

    /// Sleep for `duration`, returning early on cancellation
    async fn sleep_unless_cancelled(&self, duration: Duration) {
        let mut cancelled = self.cancelled.subscribe();
        let already = *cancelled.borrow_and_update();
        if already {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            _ = cancelled.changed() => {}
        }
    }

    /// Position of the next record to read, resolving a sentinel if needed
    async fn start_position(&self, partition: &TopicPartition) -> Result<i64> {
        let current = self.state.lock().await.get(partition);
        match current {
            Some(Offset::Offset(last)) => next_position(partition, last),
            Some(sentinel) => {
                let position = self
                    .client
                    .resolve_offset(partition, sentinel)
                    .await
                    .map_err(|e| with_poll_context(e, partition, sentinel.to_raw()))?;

                let mut state = self.state.lock().await;
                if state.get(partition).is_some_and(|o| o.is_sentinel()) {
                    state.advance(partition, position.saturating_sub(1));
                }
                debug!(
                    topic = %partition.topic,
                    partition = partition.partition,
                    %sentinel,
                    position,
                    "Resolved start offset"
                );
                Ok(position)
            }
            None => Err(Error::poll(
                &partition.topic,
                partition.partition,
                -1,
                "partition is not tracked in offset state",
            )),
        }
    }

    /// One poll round over all tracked partitions
    async fn fetch_batch(
        &self,
        positions: &mut HashMap<TopicPartition, i64>,
        emit: &mut (dyn FnMut(Record) + Send),
    ) -> Result<()> {
        let partitions = self.state.partitions().await;
        if partitions.is_empty() {
            self.sleep_unless_cancelled(self.config.poll_timeout).await;
            return Ok(());
        }

        for partition in &partitions {
            if !positions.contains_key(partition) {
                let position = self.start_position(partition).await?;
                positions.insert(partition.clone(), position);
            }
        }

        let timeout = self.config.poll_timeout;
        let targets: Vec<(&TopicPartition, i64)> = partitions
            .iter()
            .map(|partition| (partition, positions.get(partition).copied().unwrap_or(0)))
            .collect();
        let results = join_all(targets.into_iter().map(|(partition, position)| async move {
            let result = self.client.poll(partition, position, timeout).await;
            (partition, position, result)
        }))
        .await;

        let mut first_error = None;
        for (partition, position, result) in results {
            match result {
                Ok(records) => self.emit_records(partition, records, positions, emit).await,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(with_poll_context(e, partition, position));
                    }
                }
            }
            if self.is_cancelled() {
                return Ok(());
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Emit records of one partition, advancing its offset for each
    async fn emit_records(
        &self,
        partition: &TopicPartition,
        records: Vec<Record>,
        positions: &mut HashMap<TopicPartition, i64>,
        emit: &mut (dyn FnMut(Record) + Send),
    ) {
        for record in records {
            let next = positions.get(partition).copied().unwrap_or(0);
            if record.offset < next {
                continue;
            }

            let offset = record.offset;
            {
                let mut state = self.state.lock().await;
                if self.is_cancelled() {
                    return;
                }
                emit(record);
                state.advance(partition, offset);
            }
            positions.insert(partition.clone(), offset.saturating_add(1));
        }
    }
}

#[async_trait]
impl<C: BrokerClient + 'static> FetchCoordinator for BrokerFetcher<C> {
    async fn run(&self, emit: &mut (dyn FnMut(Record) + Send)) -> Result<()> {
        let mut positions = HashMap::new();
        let mut failures: u32 = 0;

        let partitions = self.state.partitions().await.len();
        info!(partitions, "Starting fetch loop");

        while !self.is_cancelled() {
            match self.fetch_batch(&mut positions, emit).await {
                Ok(()) => failures = 0,
                Err(e) if e.is_retryable() => {
                    let delay = self.config.backoff.delay(failures);
                    warn!(
                        error = %e,
                        attempt = failures + 1,
                        "Transient poll failure, retrying in {:?}",
                        delay
                    );
                    failures = failures.saturating_add(1);
                    self.sleep_unless_cancelled(delay).await;
                }
                Err(e) => {
                    error!(error = %e, "Fetch loop failed");
                    return Err(e);
                }
            }
        }

        info!("Fetch loop stopped");
        Ok(())
    }

    async fn snapshot_current_state(&self) -> OffsetState {
        self.state.snapshot().await
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn checkpoint_lock(&self) -> &CheckpointLock {
        &self.state
    }

    async fn commit_offsets(&self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let positions = offsets
            .iter()
            .map(|(partition, &last)| Ok((partition.clone(), next_position(partition, last)?)))
            .collect::<Result<BTreeMap<TopicPartition, i64>>>()?;
        self.client.commit_offsets(&positions).await
    }

    async fn close(&self) -> Result<()> {
        self.cancel();
        self.client.close().await
    }
}

/// Position after `last`; fails instead of overflowing
fn next_position(partition: &TopicPartition, last: i64) -> Result<i64> {
    last.checked_add(1).ok_or_else(|| {
        Error::poll(&partition.topic, partition.partition, last, "offset overflow")
    })
}

/// Attach partition and offset to a fatal error
fn with_poll_context(error: Error, partition: &TopicPartition, offset: i64) -> Error {
    match error {
        e @ (Error::Poll { .. }
        | Error::Transient { .. }
        | Error::Timeout { .. }
        | Error::Discovery { .. }) => e,
        e => Error::poll(&partition.topic, partition.partition, offset, e.to_string()),
    }
}
