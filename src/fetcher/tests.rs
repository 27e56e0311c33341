//! Tests for the fetch loop

use super::*;
use crate::broker::{MemoryBroker, Record};
use crate::error::Error;
use crate::partition::{Offset, TopicPartition};
use crate::state::{CheckpointLock, OffsetState};
use crate::types::{BackoffConfig, BackoffType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

fn fast_config() -> FetcherConfig {
    FetcherConfig {
        poll_timeout: Duration::from_millis(5),
        backoff: BackoffConfig::new(
            BackoffType::Constant,
            Duration::from_millis(1),
            Duration::from_millis(1),
        ),
    }
}

fn fetcher(broker: &MemoryBroker, state: OffsetState) -> Arc<BrokerFetcher<MemoryBroker>> {
    Arc::new(BrokerFetcher::new(
        Arc::new(broker.clone()),
        CheckpointLock::new(state),
        fast_config(),
    ))
}

async fn payloads(broker: &MemoryBroker, partition: &TopicPartition, count: usize) {
    broker
        .append(partition, (0..count).map(|i| format!("record-{i}")))
        .await;
}

/// Run the fetcher until `stop_after` records were emitted
async fn run_until(
    fetcher: &Arc<BrokerFetcher<MemoryBroker>>,
    stop_after: usize,
) -> (crate::Result<()>, Vec<Record>) {
    let emitted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&emitted);
    let handle = Arc::clone(fetcher);
    let mut emit = move |record: Record| {
        let mut records = sink.lock().unwrap();
        records.push(record);
        if records.len() >= stop_after {
            handle.cancel();
        }
    };
    let result = tokio::time::timeout(Duration::from_secs(5), fetcher.run(&mut emit))
        .await
        .expect("fetch loop did not stop");
    let records = emitted.lock().unwrap().clone();
    (result, records)
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_delivers_in_order_and_advances() {
    let broker = MemoryBroker::new().with_max_batch(3);
    payloads(&broker, &tp("abc", 0), 10).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Earliest)].into_iter().collect());

    let (result, records) = run_until(&fetcher, 10).await;

    result.unwrap();
    let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, (0..10).collect::<Vec<_>>());
    assert_eq!(
        fetcher.snapshot_current_state().await.get(&tp("abc", 0)),
        Some(Offset::Offset(9))
    );
}

#[tokio::test]
async fn test_resumes_after_concrete_offset() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 10).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Offset(6))].into_iter().collect());

    let (_, records) = run_until(&fetcher, 3).await;

    assert_eq!(
        records.iter().map(|r| r.offset).collect::<Vec<_>>(),
        vec![7, 8, 9]
    );
}

#[tokio::test]
async fn test_per_partition_order_across_partitions() {
    let broker = MemoryBroker::new().with_max_batch(2);
    payloads(&broker, &tp("abc", 0), 5).await;
    payloads(&broker, &tp("def", 1), 5).await;
    let state = [
        (tp("abc", 0), Offset::Earliest),
        (tp("def", 1), Offset::Earliest),
    ]
    .into_iter()
    .collect();
    let fetcher = fetcher(&broker, state);

    let (_, records) = run_until(&fetcher, 10).await;

    for partition in [tp("abc", 0), tp("def", 1)] {
        let offsets: Vec<i64> = records
            .iter()
            .filter(|r| r.partition == partition)
            .map(|r| r.offset)
            .collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }
}

// ============================================================================
// Sentinel Resolution Tests
// ============================================================================

#[tokio::test]
async fn test_latest_skips_existing_records() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 5).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Latest)].into_iter().collect());

    let runner = {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move {
            let (result, records) = run_until(&fetcher, 1).await;
            result.map(|()| records)
        })
    };

    // wait until the sentinel was resolved, then produce more
    while fetcher.snapshot_current_state().await.get(&tp("abc", 0)) == Some(Offset::Latest) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(
        fetcher.snapshot_current_state().await.get(&tp("abc", 0)),
        Some(Offset::Offset(4))
    );
    broker.append(&tp("abc", 0), ["late"]).await;

    let records = runner.await.unwrap().unwrap();
    assert_eq!(records[0].offset, 5);
}

#[tokio::test]
async fn test_group_offset_resolution() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 5).await;
    broker.set_committed(&tp("abc", 0), 3).await;
    let fetcher = fetcher(
        &broker,
        [(tp("abc", 0), Offset::GroupOffset)].into_iter().collect(),
    );

    let (_, records) = run_until(&fetcher, 2).await;

    assert_eq!(
        records.iter().map(|r| r.offset).collect::<Vec<_>>(),
        vec![3, 4]
    );
}

// ============================================================================
// Snapshot Consistency Tests
// ============================================================================

#[tokio::test]
async fn test_snapshot_matches_nth_emitted_record() {
    let broker = MemoryBroker::new().with_max_batch(50);
    payloads(&broker, &tp("abc", 0), 100).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Earliest)].into_iter().collect());

    let (_, records) = run_until(&fetcher, 37).await;

    assert_eq!(records.len(), 37);
    assert_eq!(
        fetcher.snapshot_current_state().await.get(&tp("abc", 0)),
        Some(Offset::Offset(records[36].offset))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_snapshots_are_aligned_with_emission() {
    let broker = MemoryBroker::new().with_max_batch(7);
    payloads(&broker, &tp("abc", 0), 2000).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Earliest)].into_iter().collect());
    let emitted = Arc::new(AtomicUsize::new(0));

    let runner = {
        let fetcher = Arc::clone(&fetcher);
        let emitted = Arc::clone(&emitted);
        tokio::spawn(async move {
            let handle = Arc::clone(&fetcher);
            let mut emit = move |_record: Record| {
                if emitted.fetch_add(1, Ordering::SeqCst) + 1 == 2000 {
                    handle.cancel();
                }
            };
            fetcher.run(&mut emit).await
        })
    };

    let lock = fetcher.checkpoint_lock().clone();
    for _ in 0..200 {
        {
            let state = lock.lock().await;
            let count = emitted.load(Ordering::SeqCst) as i64;
            match state.get(&tp("abc", 0)) {
                Some(Offset::Offset(last)) => assert_eq!(last, count - 1),
                Some(Offset::Earliest) => assert_eq!(count, 0),
                other => panic!("unexpected offset {other:?}"),
            }
        }
        tokio::task::yield_now().await;
    }

    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(emitted.load(Ordering::SeqCst), 2000);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_transient_poll_errors_are_retried() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 3).await;
    broker.fail_next_poll(Error::transient("network blip")).await;
    broker.fail_next_poll(Error::Timeout { timeout_ms: 5 }).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Earliest)].into_iter().collect());

    let (result, records) = run_until(&fetcher, 3).await;

    result.unwrap();
    assert_eq!(records.len(), 3);
    assert!(broker.poll_count().await >= 3);
}

#[tokio::test]
async fn test_fatal_poll_error_carries_context() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 3).await;
    broker
        .fail_next_poll(Error::from(anyhow::anyhow!("authorization revoked")))
        .await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Offset(1))].into_iter().collect());

    let (result, records) = run_until(&fetcher, 10).await;

    assert!(records.is_empty());
    match result {
        Err(Error::Poll {
            topic,
            partition,
            offset,
            message,
        }) => {
            assert_eq!(topic, "abc");
            assert_eq!(partition, 0);
            assert_eq!(offset, 2);
            assert!(message.contains("authorization revoked"));
        }
        other => panic!("expected poll error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_partition_is_fatal() {
    let broker = MemoryBroker::new();
    let fetcher = fetcher(&broker, [(tp("gone", 0), Offset::Earliest)].into_iter().collect());

    let (result, _) = run_until(&fetcher, 1).await;

    assert!(matches!(result, Err(Error::Poll { .. })));
}

#[tokio::test]
async fn test_restored_max_offset_fails_instead_of_overflowing() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 1).await;
    let restored: OffsetState = [(tp("abc", 0), Offset::Offset(i64::MAX))].into_iter().collect();
    let state = OffsetState::deserialize(&restored.serialize()).unwrap();
    let fetcher = fetcher(&broker, state);

    let (result, records) = run_until(&fetcher, 1).await;

    assert!(records.is_empty());
    match result {
        Err(Error::Poll {
            topic,
            offset,
            message,
            ..
        }) => {
            assert_eq!(topic, "abc");
            assert_eq!(offset, i64::MAX);
            assert!(message.contains("overflow"));
        }
        other => panic!("expected poll error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_commit_of_max_offset_is_rejected() {
    let broker = MemoryBroker::new();
    let fetcher = fetcher(&broker, OffsetState::new());
    let offsets = [(tp("abc", 0), i64::MAX)].into_iter().collect();

    let result = fetcher.commit_offsets(&offsets).await;

    assert!(matches!(result, Err(Error::Poll { .. })));
    assert_eq!(broker.commit_count().await, 0);
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancel_stops_idle_loop_promptly() {
    let broker = MemoryBroker::new();
    broker.create_topic("abc", 1).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Earliest)].into_iter().collect());
    let emitted = Arc::new(AtomicUsize::new(0));

    let runner = {
        let fetcher = Arc::clone(&fetcher);
        let emitted = Arc::clone(&emitted);
        tokio::spawn(async move {
            let mut emit = move |_record: Record| {
                emitted.fetch_add(1, Ordering::SeqCst);
            };
            fetcher.run(&mut emit).await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    fetcher.cancel();
    assert!(fetcher.is_cancelled());
    broker.append(&tp("abc", 0), ["after cancel"]).await;

    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("run did not return after cancel")
        .unwrap()
        .unwrap();
    assert_eq!(emitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_partitions_added_while_running_are_fetched() {
    let broker = MemoryBroker::new();
    payloads(&broker, &tp("abc", 0), 1).await;
    payloads(&broker, &tp("abc", 1), 2).await;
    let fetcher = fetcher(&broker, [(tp("abc", 0), Offset::Earliest)].into_iter().collect());

    let runner = {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move { run_until(&fetcher, 3).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    fetcher
        .checkpoint_lock()
        .add_partitions([tp("abc", 1)], Offset::Earliest)
        .await;

    let (result, records) = runner.await.unwrap();
    result.unwrap();
    assert_eq!(records.iter().filter(|r| r.partition == tp("abc", 1)).count(), 2);
}

// ============================================================================
// Commit Tests
// ============================================================================

#[tokio::test]
async fn test_commit_offsets_sends_next_positions() {
    let broker = MemoryBroker::new();
    broker.create_topic("abc", 2).await;
    let fetcher = fetcher(&broker, OffsetState::new());

    let offsets = [(tp("abc", 0), 16767), (tp("abc", 1), -1)]
        .into_iter()
        .collect();
    fetcher.commit_offsets(&offsets).await.unwrap();

    let committed = broker.committed().await;
    assert_eq!(committed.get(&tp("abc", 0)), Some(&16768));
    assert_eq!(committed.get(&tp("abc", 1)), Some(&0));
}

#[tokio::test]
async fn test_close_releases_client() {
    let broker = MemoryBroker::new();
    let fetcher = fetcher(&broker, OffsetState::new());

    fetcher.close().await.unwrap();

    assert!(fetcher.is_cancelled());
    assert!(broker.is_closed().await);
}
