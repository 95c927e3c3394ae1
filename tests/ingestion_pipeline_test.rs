//! End-to-end tests of the ingestion pipeline over in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use qubic_events_consumer::api::{HealthState, HealthStatus};
use qubic_events_consumer::ingest::{
    CycleError, CyclePacing, EventConsumer, IngestMetrics, MetricsSnapshot, ProgressTracker,
    INGESTION_COMPONENT,
};
use qubic_events_consumer::test_utils::{test_event, MemoryEventSource, MemoryIndexClient};
use qubic_events_consumer::{derive_id, BatchIndexer};
use tokio_util::sync::CancellationToken;

struct Pipeline {
    source: MemoryEventSource,
    index: MemoryIndexClient,
    metrics: Arc<IngestMetrics>,
    consumer: EventConsumer,
}

fn pipeline_with(index: MemoryIndexClient, source: MemoryEventSource) -> Pipeline {
    let metrics = Arc::new(IngestMetrics::new());
    let indexer = BatchIndexer::new(Arc::new(index.clone()), 8, 5 * 1024 * 1024);
    let consumer = EventConsumer::new(
        Arc::new(source.clone()),
        indexer,
        ProgressTracker::new(Arc::clone(&metrics)),
        1000,
    );

    Pipeline {
        source,
        index,
        metrics,
        consumer,
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(MemoryIndexClient::new(), MemoryEventSource::new())
}

#[tokio::test]
async fn test_end_to_end_single_cycle() {
    let mut p = pipeline();
    let offsets = vec![
        p.source.push_event(0, &test_event(150, 10, 1)),
        p.source.push_event(0, &test_event(150, 10, 2)),
        p.source.push_event(0, &test_event(150, 11, 3)),
    ];

    let report = p
        .consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.cursor.tick, 11);
    assert_eq!(p.index.document_count(), 3);
    assert_eq!(p.source.acknowledgements(), vec![offsets]);

    let snapshot = p.metrics.snapshot();
    assert_eq!(snapshot.processed_messages, 3);
    // Fresh tracker: 0 -> 10 and 10 -> 11
    assert_eq!(snapshot.processed_ticks, 2);
    assert_eq!(snapshot.processed_tick, 11);
}

#[tokio::test]
async fn test_documents_keyed_by_derived_id() {
    let mut p = pipeline();
    let event = test_event(150, 42, 7);
    p.source.push_event(0, &event);

    p.consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let id = derive_id(&event).unwrap();
    assert!(p.index.get(id.as_str()).is_some());
}

#[tokio::test]
async fn test_redelivered_batch_is_idempotent() {
    let mut p = pipeline();
    for tick in 1..=5 {
        p.source.push_event(0, &test_event(1, tick, u64::from(tick)));
    }

    // Force a redelivery of the whole batch after a failed commit path
    p.index.fail_requests(1);
    p.consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    p.consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();
    let first = p.index.snapshot();

    // A replay of the same events leaves the index unchanged
    for tick in 1..=5 {
        p.source.push_event(1, &test_event(1, tick, u64::from(tick)));
    }
    p.consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(p.index.snapshot(), first);
    assert_eq!(p.index.document_count(), 5);
}

#[tokio::test]
async fn test_atomic_commit() {
    let mut p = pipeline();
    let events: Vec<_> = (0..10).map(|i| test_event(1, 200 + i, u64::from(i))).collect();
    for event in &events {
        p.source.push_event(0, event);
    }
    p.index.reject_once([
        derive_id(&events[1]).unwrap(),
        derive_id(&events[6]).unwrap(),
    ]);

    let err = p
        .consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CycleError::PartialIndexFailure { failed: 2, total: 10 }
    ));
    assert!(p.source.acknowledgements().is_empty());
    assert_eq!(p.source.uncommitted_count(), 10);
    // Gauges are only published for committed batches
    assert_eq!(p.metrics.snapshot().processed_tick, 0);

    p.consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();
    let acks = p.source.acknowledgements();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].len(), 10);
    assert_eq!(p.source.uncommitted_count(), 0);
    assert_eq!(p.index.document_count(), 10);
}

#[tokio::test]
async fn test_empty_batch_changes_nothing() {
    let mut p = pipeline();

    let report = p
        .consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.records, 0);
    assert_eq!(p.index.request_count(), 0);
    assert!(p.source.acknowledgements().is_empty());
    assert_eq!(p.metrics.snapshot(), MetricsSnapshot::default());
}

#[tokio::test]
async fn test_malformed_record_blocks_commit() {
    let mut p = pipeline();
    p.source.push_event(0, &test_event(1, 1, 1));
    p.source.push(0, br#"{"epoch":1,"tick":2}"#.to_vec());
    p.source.push_event(0, &test_event(1, 3, 3));

    let err = p
        .consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CycleError::Parse { offset: 1, .. }));
    assert_eq!(p.index.request_count(), 0);
    assert!(p.source.acknowledgements().is_empty());
}

#[tokio::test]
async fn test_partitions_commit_together() {
    let mut p = pipeline();
    p.source.push_event(0, &test_event(1, 1, 1));
    p.source.push_event(1, &test_event(1, 2, 2));
    p.source.push_event(2, &test_event(1, 3, 3));

    p.consumer
        .consume_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let acks = p.source.acknowledgements();
    assert_eq!(acks.len(), 1);
    let mut partitions: Vec<_> = acks[0].iter().map(|o| o.partition).collect();
    partitions.sort();
    assert_eq!(partitions, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_cancellation_during_slow_index() {
    let mut p = pipeline_with(
        MemoryIndexClient::with_latency(Duration::from_secs(30)),
        MemoryEventSource::new(),
    );
    p.source.push_event(0, &test_event(1, 1, 1));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = p.consumer.consume_cycle(&cancel).await.unwrap_err();
    assert!(matches!(err, CycleError::Cancelled));
    assert!(p.source.acknowledgements().is_empty());
}

#[tokio::test]
async fn test_run_survives_failures_and_stops_on_cancel() {
    let source = MemoryEventSource::new();
    let index = MemoryIndexClient::new();
    let p = pipeline_with(index.clone(), source.clone());
    let health = HealthState::new();

    let consumer = p
        .consumer
        .with_pacing(CyclePacing {
            cycle_delay: Duration::from_millis(5),
            retry_initial: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
        })
        .with_health(health.clone());

    source.push(0, b"garbage".to_vec());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(consumer.run(cancel.clone()));

    // The poisoned record keeps failing; the loop keeps going
    let mut degraded = false;
    for _ in 0..200 {
        if let Some(component) = health.component(INGESTION_COMPONENT).await {
            if component.status == HealthStatus::Degraded && source.poll_count() >= 3 {
                degraded = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(degraded);
    assert!(source.acknowledgements().is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stops after cancellation")
        .unwrap()
        .unwrap();
}
