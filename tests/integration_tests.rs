//! Integration tests using the in-memory broker
//!
//! Tests the full end-to-end flow: open → run → snapshot → store → restore

use solidafy_logsource::config::{SourceConfig, TopicsDescriptor};
use solidafy_logsource::connector::{LifecyclePhase, SourceConnector};
use solidafy_logsource::partition::{Offset, SubtaskInfo, TopicPartition};
use solidafy_logsource::state::{OffsetState, SnapshotStore, SnapshotVersion};
use solidafy_logsource::types::{BackoffConfig, BackoffType, StartupMode};
use solidafy_logsource::{MemoryBroker, Record};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

fn config(topics: &[&str]) -> SourceConfig {
    let mut config = SourceConfig::new(TopicsDescriptor::topics(topics.iter().copied()));
    config.poll_timeout_ms = 5;
    config.checkpointing_enabled = true;
    config.startup_mode = StartupMode::Earliest;
    config.backoff = BackoffConfig::new(
        BackoffType::Exponential,
        Duration::from_millis(1),
        Duration::from_millis(4),
    );
    config
}

/// Snapshot bytes as written by releases before the format tag existed
fn unversioned_fixture() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&2i32.to_be_bytes());
    for (topic, partition, offset) in [("abc", 13i32, 16768i64), ("def", 7, 987_654_321)] {
        bytes.extend_from_slice(&(topic.len() as i32).to_be_bytes());
        bytes.extend_from_slice(topic.as_bytes());
        bytes.extend_from_slice(&partition.to_be_bytes());
        bytes.extend_from_slice(&offset.to_be_bytes());
    }
    bytes
}

fn expected_fixture_state() -> OffsetState {
    [
        (tp("abc", 13), Offset::Offset(16768)),
        (tp("def", 7), Offset::Offset(987_654_321)),
    ]
    .into_iter()
    .collect()
}

async fn receive(records: &mut mpsc::UnboundedReceiver<Record>, count: usize) -> Vec<Record> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        let record = tokio::time::timeout(Duration::from_secs(5), records.recv())
            .await
            .expect("timed out waiting for records")
            .expect("connector stopped emitting");
        received.push(record);
    }
    received
}

fn spawn_run(
    connector: &Arc<SourceConnector>,
) -> (
    tokio::task::JoinHandle<solidafy_logsource::Result<()>>,
    mpsc::UnboundedReceiver<Record>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::clone(connector);
    let handle = tokio::spawn(async move {
        let mut emit = move |record: Record| {
            let _ = tx.send(record);
        };
        connector.run(&mut emit).await
    });
    (handle, rx)
}

// ============================================================================
// Checkpoint / Recovery Tests
// ============================================================================

#[tokio::test]
async fn test_recover_from_stored_snapshot_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    let broker = Arc::new(MemoryBroker::new().with_max_batch(4));
    for partition in 0..3 {
        broker
            .append(&tp("orders", partition), (0..10).map(|i| format!("p{partition}-{i}")))
            .await;
    }

    // First run: consume everything, checkpoint, stop
    let mut first =
        SourceConnector::with_client(config(&["orders"]), SubtaskInfo::single(), Arc::clone(&broker))
            .unwrap();
    assert_ok!(first.open().await);
    let first = Arc::new(first);
    let (handle, mut records) = spawn_run(&first);
    let consumed = receive(&mut records, 30).await;

    let snapshot = first.snapshot_state(1).await.unwrap();
    store.save(1, &snapshot).await.unwrap();
    assert_ok!(first.notify_checkpoint_complete(1).await);
    assert_ok!(first.close().await);
    assert_ok!(handle.await.unwrap());
    assert_eq!(first.phase(), LifecyclePhase::Closed);
    assert_eq!(broker.committed().await.get(&tp("orders", 2)), Some(&10));

    // More data arrives while the job is down
    for partition in 0..3 {
        broker
            .append(&tp("orders", partition), [format!("p{partition}-late")])
            .await;
    }

    // Second run: restore from the latest stored snapshot
    let (checkpoint_id, bytes) = store.latest().await.unwrap().unwrap();
    assert_eq!(checkpoint_id, 1);
    let mut second =
        SourceConnector::with_client(config(&["orders"]), SubtaskInfo::single(), Arc::clone(&broker))
            .unwrap();
    assert_ok!(second.restore_state(&bytes));
    assert_ok!(second.open().await);
    let second = Arc::new(second);
    let (handle, mut records) = spawn_run(&second);
    let resumed = receive(&mut records, 3).await;
    second.cancel();
    assert_ok!(handle.await.unwrap());

    assert_eq!(consumed.len(), 30);
    for record in &resumed {
        assert_eq!(record.offset, 10, "resumed at {:?}", record.partition);
    }
    let restored = second.restored_state().unwrap();
    for partition in 0..3 {
        assert_eq!(restored.get(&tp("orders", partition)), Some(Offset::Offset(9)));
    }
}

#[tokio::test]
async fn test_unresolved_sentinels_survive_recovery() {
    let broker = Arc::new(MemoryBroker::new());
    broker.create_topic("abc", 2).await;
    let mut config = config(&["abc"]);
    config.startup_mode = StartupMode::Latest;

    let mut first =
        SourceConnector::with_client(config.clone(), SubtaskInfo::single(), Arc::clone(&broker))
            .unwrap();
    first.open().await.unwrap();
    let bytes = first.snapshot_state(1).await.unwrap();
    first.close().await.unwrap();

    let mut second =
        SourceConnector::with_client(config, SubtaskInfo::single(), Arc::clone(&broker)).unwrap();
    second.restore_state(&bytes).unwrap();
    second.open().await.unwrap();

    let expected: OffsetState = [(tp("abc", 0), Offset::Latest), (tp("abc", 1), Offset::Latest)]
        .into_iter()
        .collect();
    assert_eq!(second.subscribed_partitions_with_offsets(), &expected);
}

// ============================================================================
// Legacy Snapshot Tests
// ============================================================================

#[tokio::test]
async fn test_restore_unversioned_snapshot() {
    let broker = Arc::new(MemoryBroker::new());
    broker.create_topic("abc", 14).await;
    broker.create_topic("def", 8).await;

    for release in [None, Some(SnapshotVersion::V0_1), Some(SnapshotVersion::V0_2)] {
        let mut connector = SourceConnector::with_client(
            config(&["abc", "def"]),
            SubtaskInfo::single(),
            Arc::clone(&broker),
        )
        .unwrap();
        match release {
            Some(release) => assert_ok!(connector.restore_legacy_state(&unversioned_fixture(), release)),
            None => assert_ok!(connector.restore_state(&unversioned_fixture())),
        }
        connector.open().await.unwrap();

        assert_eq!(connector.restored_state(), Some(&expected_fixture_state()));
        let subscribed = connector.subscribed_partitions_with_offsets();
        assert_eq!(subscribed.len(), 22);
        assert_eq!(subscribed.get(&tp("abc", 13)), Some(Offset::Offset(16768)));
        assert_eq!(subscribed.get(&tp("def", 7)), Some(Offset::Offset(987_654_321)));
        assert_eq!(subscribed.get(&tp("abc", 0)), Some(Offset::Earliest));
    }
}

#[tokio::test]
async fn test_unversioned_snapshot_is_not_a_tagged_release() {
    let broker = Arc::new(MemoryBroker::new());
    let mut connector =
        SourceConnector::with_client(config(&["abc"]), SubtaskInfo::single(), broker).unwrap();

    assert_err!(connector.restore_legacy_state(&unversioned_fixture(), SnapshotVersion::V0_3));
    assert!(connector.restored_state().is_none());
}

#[tokio::test]
async fn test_migrated_snapshot_restores_identically() {
    let legacy = OffsetState::deserialize(&unversioned_fixture()).unwrap();
    let current = legacy.serialize();

    assert_ne!(&current[..], unversioned_fixture().as_slice());
    assert_eq!(OffsetState::deserialize(&current).unwrap(), expected_fixture_state());
}

// ============================================================================
// Rescale Tests
// ============================================================================

#[tokio::test]
async fn test_parallel_subtasks_cover_all_partitions_once() {
    let broker = Arc::new(MemoryBroker::new());
    broker.create_topic("abc", 5).await;
    broker.create_topic("def", 3).await;

    let mut covered = OffsetState::new();
    for index in 0..4 {
        let mut connector = SourceConnector::with_client(
            config(&["abc", "def"]),
            SubtaskInfo::new(index, 4),
            Arc::clone(&broker),
        )
        .unwrap();
        connector.open().await.unwrap();
        for (partition, offset) in connector.subscribed_partitions_with_offsets() {
            assert!(covered.add_if_absent(partition.clone(), *offset));
        }
    }

    assert_eq!(covered.len(), 8);
}
