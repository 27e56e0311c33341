//! Source connector lifecycle
//!
//! Ties the registry, discoverer and fetcher together: restores offsets,
//! merges them with the discovered partitions at open, runs fetching and
//! periodic discovery side by side, and turns checkpoints into snapshot
//! bytes and offset commits.

use super::commit::{OffsetCommitMode, PendingCheckpoints};
use super::factory::{BrokerComponentFactory, ComponentFactory};
use crate::broker::{BrokerClient, Record};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::fetcher::{FetchCoordinator, FetcherConfig};
use crate::partition::{Offset, PartitionDiscoverer, PartitionRegistry, SubtaskInfo, TopicPartition};
use crate::state::{deserialize_legacy, CheckpointLock, OffsetState, SnapshotVersion};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a [`SourceConnector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Constructed; state may be restored
    Created,
    /// Partitions assigned and offset state built
    Opened,
    /// Fetching records
    Running,
    /// Copying offset state for a checkpoint while running
    Snapshotting,
    /// Cancel requested
    Cancelling,
    /// Resources released
    Closed,
}

impl LifecyclePhase {
    fn is_stopping(self) -> bool {
        matches!(self, Self::Cancelling | Self::Closed)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Opened => "opened",
            Self::Running => "running",
            Self::Snapshotting => "snapshotting",
            Self::Cancelling => "cancelling",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A checkpointed log source for one parallel subtask
pub struct SourceConnector {
    config: SourceConfig,
    registry: PartitionRegistry,
    factory: Arc<dyn ComponentFactory>,
    commit_mode: OffsetCommitMode,
    phase: watch::Sender<LifecyclePhase>,
    /// Offsets decoded by `restore_state`; `None` on a fresh start
    restored: Option<OffsetState>,
    /// Offsets as merged at `open`
    subscribed: OffsetState,
    discoverer: Option<Mutex<Box<dyn PartitionDiscoverer>>>,
    fetcher: Option<Arc<dyn FetchCoordinator>>,
    pending: Mutex<PendingCheckpoints>,
}

impl SourceConnector {
    /// Create a connector whose components come from `factory`
    pub fn new(
        config: SourceConfig,
        subtask: SubtaskInfo,
        factory: Arc<dyn ComponentFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = PartitionRegistry::new(subtask)?;
        let commit_mode =
            OffsetCommitMode::from_flags(config.checkpointing_enabled, config.auto_commit_enabled);
        let (phase, _) = watch::channel(LifecyclePhase::Created);

        Ok(Self {
            config,
            registry,
            factory,
            commit_mode,
            phase,
            restored: None,
            subscribed: OffsetState::new(),
            discoverer: None,
            fetcher: None,
            pending: Mutex::new(PendingCheckpoints::new()),
        })
    }

    /// Create a connector driving `client` directly
    pub fn with_client<C: BrokerClient + 'static>(
        config: SourceConfig,
        subtask: SubtaskInfo,
        client: Arc<C>,
    ) -> Result<Self> {
        Self::new(config, subtask, Arc::new(BrokerComponentFactory::new(client)))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle phase
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// How offsets are committed back to the broker
    pub fn commit_mode(&self) -> OffsetCommitMode {
        self.commit_mode
    }

    /// Source configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Subtask this connector runs as
    pub fn subtask(&self) -> SubtaskInfo {
        self.registry.subtask()
    }

    /// Offsets decoded by `restore_state`, unchanged by `open`
    pub fn restored_state(&self) -> Option<&OffsetState> {
        self.restored.as_ref()
    }

    /// Partitions and start offsets as merged at `open`
    pub fn subscribed_partitions_with_offsets(&self) -> &OffsetState {
        &self.subscribed
    }

    /// Live offsets, including partitions discovered while running
    pub async fn current_state(&self) -> OffsetState {
        match &self.fetcher {
            Some(fetcher) => fetcher.snapshot_current_state().await,
            None => OffsetState::new(),
        }
    }

    /// Ids of snapshots whose checkpoints have not completed yet
    pub async fn pending_checkpoints(&self) -> Vec<u64> {
        self.pending.lock().await.ids()
    }

    // ========================================================================
    // Restore / Open
    // ========================================================================

    /// Restore offsets from snapshot bytes of any supported format
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.require_phase("restore state", &[LifecyclePhase::Created])?;
        let state = OffsetState::deserialize(bytes)?;
        self.set_restored(state);
        Ok(())
    }

    /// Restore offsets from a snapshot written by a known older release
    pub fn restore_legacy_state(&mut self, bytes: &[u8], release: SnapshotVersion) -> Result<()> {
        self.require_phase("restore state", &[LifecyclePhase::Created])?;
        let state = deserialize_legacy(bytes, release)?;
        self.set_restored(state);
        Ok(())
    }

    fn set_restored(&mut self, state: OffsetState) {
        let subtask = self.registry.subtask();
        info!(
            subtask = subtask.index,
            partitions = state.len(),
            "Restored offset state"
        );
        for (partition, offset) in &state {
            debug!(topic = %partition.topic, partition = partition.partition, %offset, "Restored offset");
        }
        self.restored = Some(state);
    }

    /// Assign partitions and build the offset state
    pub async fn open(&mut self) -> Result<()> {
        self.require_phase("open", &[LifecyclePhase::Created])?;

        let mut discoverer = self.factory.create_discoverer(&self.config.topics);
        discoverer.open().await?;
        let discovered = match self.discover_with_retry(discoverer.as_mut()).await {
            Ok(discovered) => discovered,
            Err(e) => {
                if let Err(close_error) = discoverer.close().await {
                    warn!(error = %close_error, "Failed to close partition discoverer");
                }
                return Err(e);
            }
        };
        let owned = self.registry.assign(&discovered);

        let state = self.merge(&owned);
        for partition in state.partitions() {
            discoverer.validate_and_mark(&partition);
        }

        let subtask = self.registry.subtask();
        info!(
            subtask = subtask.index,
            num_subtasks = subtask.num_subtasks,
            discovered = discovered.len(),
            owned = state.len(),
            commit_mode = %self.commit_mode,
            "Opened source connector"
        );

        let fetcher = self
            .factory
            .create_fetcher(CheckpointLock::new(state.clone()), FetcherConfig::from(&self.config));
        self.subscribed = state;
        self.discoverer = Some(Mutex::new(discoverer));
        self.fetcher = Some(fetcher);
        self.phase.send_replace(LifecyclePhase::Opened);
        Ok(())
    }

    /// Initial offsets from the restored state and the owned partitions
    ///
    /// Without a restore every owned partition starts at the configured
    /// startup offset. With a restore, owned restored entries are kept and
    /// owned partitions the restore does not know start at `EARLIEST`.
    fn merge(&self, owned: &[TopicPartition]) -> OffsetState {
        let Some(restored) = &self.restored else {
            return owned
                .iter()
                .map(|partition| (partition.clone(), self.config.startup_offset(partition)))
                .collect();
        };

        let subscribed_topics = self
            .config
            .filter_restored_partitions_with_subscribed_topics
            .then(|| self.config.topics.matcher().ok());
        let mut state: OffsetState = restored
            .iter()
            .filter(|(partition, _)| self.registry.is_owned(partition))
            .filter(|(partition, _)| {
                let keep = match &subscribed_topics {
                    None => true,
                    Some(matcher) => matcher
                        .as_ref()
                        .is_some_and(|matcher| matcher.is_match(&partition.topic)),
                };
                if !keep {
                    debug!(
                        topic = %partition.topic,
                        partition = partition.partition,
                        "Dropping restored partition of unsubscribed topic"
                    );
                }
                keep
            })
            .map(|(partition, offset)| (partition.clone(), *offset))
            .collect();

        for partition in owned {
            if state.add_if_absent(partition.clone(), Offset::Earliest) {
                debug!(
                    topic = %partition.topic,
                    partition = partition.partition,
                    "Partition not in restored state, starting from earliest"
                );
            }
        }
        state
    }

    /// Initial discovery, retrying retryable failures with backoff
    async fn discover_with_retry(
        &self,
        discoverer: &mut dyn PartitionDiscoverer,
    ) -> Result<Vec<TopicPartition>> {
        let max_attempts = self.config.max_discovery_attempts;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match discoverer.discover().await {
                Ok(partitions) => return Ok(partitions),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(Error::DiscoveryExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.config.backoff.delay(attempt - 1);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        "Initial partition discovery failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Fetch records until cancelled or a fatal error
    ///
    /// Periodic discovery runs next to the fetch loop when enabled.
    pub async fn run(&self, emit: &mut (dyn FnMut(Record) + Send)) -> Result<()> {
        let mut rejected = None;
        self.phase.send_if_modified(|phase| match phase {
            LifecyclePhase::Opened => {
                *phase = LifecyclePhase::Running;
                true
            }
            other => {
                rejected = Some(*other);
                false
            }
        });
        match rejected {
            None => {}
            Some(phase) if phase.is_stopping() => {
                debug!("Connector cancelled before run");
                return Ok(());
            }
            Some(phase) => return Err(Error::invalid_state("run", phase)),
        }

        let fetcher = self.fetcher()?;
        let result = match self.config.discovery_interval() {
            None => fetcher.run(emit).await,
            Some(interval) => {
                let mut fetch = fetcher.run(emit);
                tokio::select! {
                    result = &mut fetch => result,
                    discovery = self.discovery_loop(interval, fetcher.as_ref()) => match discovery {
                        Ok(()) => fetch.await,
                        Err(e) => {
                            fetcher.cancel();
                            // drain the fetch loop; the discovery failure is what's reported
                            let _ = fetch.await;
                            Err(e)
                        }
                    },
                }
            }
        };

        if let Err(e) = &result {
            error!(error = %e, "Source connector failed");
            self.cancel();
        }
        result
    }

    /// Re-poll the broker for new partitions every `interval`
    ///
    /// Returns when the connector is cancelled, or with `DiscoveryExhausted`
    /// after too many consecutive failures.
    async fn discovery_loop(&self, interval: Duration, fetcher: &dyn FetchCoordinator) -> Result<()> {
        let mut phase = self.phase.subscribe();
        let max_attempts = self.config.max_discovery_attempts;
        let mut failures: u32 = 0;

        loop {
            let delay = if failures == 0 {
                interval
            } else {
                self.config.backoff.delay(failures - 1)
            };
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = wait_until_stopping(&mut phase) => return Ok(()),
            }

            match self.discover_new_partitions(fetcher).await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    if failures >= max_attempts {
                        error!(error = %e, failures, "Partition discovery exhausted");
                        return Err(Error::DiscoveryExhausted {
                            attempts: failures,
                            message: e.to_string(),
                        });
                    }
                    warn!(error = %e, failures, max_attempts, "Partition discovery failed");
                }
            }
        }
    }

    /// One discovery cycle; new owned partitions start at `EARLIEST`
    async fn discover_new_partitions(
        &self,
        fetcher: &dyn FetchCoordinator,
    ) -> Result<Vec<TopicPartition>> {
        let Some(discoverer) = &self.discoverer else {
            return Err(Error::invalid_state("discover partitions", self.phase()));
        };

        let new_partitions: Vec<TopicPartition> = {
            let mut discoverer = discoverer.lock().await;
            let discovered = discoverer.discover().await?;
            self.registry
                .assign(&discovered)
                .into_iter()
                .filter(|partition| discoverer.validate_and_mark(partition))
                .collect()
        };
        if new_partitions.is_empty() {
            return Ok(new_partitions);
        }

        let added = fetcher
            .checkpoint_lock()
            .add_partitions(new_partitions, Offset::Earliest)
            .await;
        for partition in &added {
            info!(
                topic = %partition.topic,
                partition = partition.partition,
                "Discovered new partition"
            );
        }
        Ok(added)
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Snapshot the offset state for checkpoint `checkpoint_id`
    ///
    /// The state is copied under the checkpoint lock and serialized after
    /// the lock is released.
    pub async fn snapshot_state(&self, checkpoint_id: u64) -> Result<Bytes> {
        self.require_phase(
            "snapshot state",
            &[
                LifecyclePhase::Opened,
                LifecyclePhase::Running,
                LifecyclePhase::Snapshotting,
            ],
        )?;
        let fetcher = self.fetcher()?;

        self.transition(LifecyclePhase::Running, LifecyclePhase::Snapshotting);
        let state = fetcher.snapshot_current_state().await;
        self.transition(LifecyclePhase::Snapshotting, LifecyclePhase::Running);

        if self.commit_mode == OffsetCommitMode::OnCheckpoints {
            self.pending
                .lock()
                .await
                .insert(checkpoint_id, state.concrete_offsets());
        }

        let bytes = state.serialize();
        debug!(
            checkpoint_id,
            partitions = state.len(),
            bytes = bytes.len(),
            "Snapshotted offset state"
        );
        Ok(bytes)
    }

    /// Commit the offsets of a completed checkpoint
    ///
    /// Only acts in `OnCheckpoints` mode. Unknown ids are ignored and
    /// commit failures are logged, not returned.
    pub async fn notify_checkpoint_complete(&self, checkpoint_id: u64) -> Result<()> {
        if self.commit_mode != OffsetCommitMode::OnCheckpoints {
            return Ok(());
        }
        let phase = self.phase();
        if phase.is_stopping() {
            debug!(checkpoint_id, %phase, "Ignoring checkpoint completion");
            return Ok(());
        }
        let fetcher = self.fetcher()?;

        let Some(offsets) = self.pending.lock().await.complete(checkpoint_id) else {
            debug!(checkpoint_id, "Checkpoint not pending, nothing to commit");
            return Ok(());
        };
        if offsets.is_empty() {
            debug!(checkpoint_id, "Checkpoint has no resolved offsets to commit");
            return Ok(());
        }

        match fetcher.commit_offsets(&offsets).await {
            Ok(()) => debug!(checkpoint_id, partitions = offsets.len(), "Committed offsets"),
            Err(e) => warn!(checkpoint_id, error = %e, "Failed to commit offsets to broker"),
        }
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Request the fetch and discovery loops to stop. Idempotent.
    pub fn cancel(&self) {
        let changed = self.phase.send_if_modified(|phase| {
            if phase.is_stopping() {
                false
            } else {
                *phase = LifecyclePhase::Cancelling;
                true
            }
        });
        if let Some(fetcher) = &self.fetcher {
            fetcher.cancel();
        }
        if changed {
            info!("Cancelling source connector");
        }
    }

    /// Stop everything and release the broker client. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.phase() == LifecyclePhase::Closed {
            return Ok(());
        }
        self.cancel();

        let mut first_error = None;
        if let Some(discoverer) = &self.discoverer {
            if let Err(e) = discoverer.lock().await.close().await {
                warn!(error = %e, "Failed to close partition discoverer");
                first_error.get_or_insert(e);
            }
        }
        if let Some(fetcher) = &self.fetcher {
            if let Err(e) = fetcher.close().await {
                warn!(error = %e, "Failed to close fetcher");
                first_error.get_or_insert(e);
            }
        }

        self.phase.send_replace(LifecyclePhase::Closed);
        info!("Closed source connector");
        first_error.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn fetcher(&self) -> Result<Arc<dyn FetchCoordinator>> {
        self.fetcher
            .clone()
            .ok_or_else(|| Error::invalid_state("use fetcher", self.phase()))
    }

    fn require_phase(&self, operation: &str, allowed: &[LifecyclePhase]) -> Result<()> {
        let phase = self.phase();
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, phase))
        }
    }

    fn transition(&self, from: LifecyclePhase, to: LifecyclePhase) {
        self.phase.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                true
            } else {
                false
            }
        });
    }
}

/// Resolve once `phase` reaches a stopping phase
async fn wait_until_stopping(phase: &mut watch::Receiver<LifecyclePhase>) {
    loop {
        let stopping = phase.borrow_and_update().is_stopping();
        if stopping || phase.changed().await.is_err() {
            return;
        }
    }
}
