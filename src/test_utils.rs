//! Test utilities for the events consumer
//!
//! This module provides in-memory implementations of the log and index
//! collaborators, plus helpers to build event records.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::index::{BulkResponse, IndexClient, IndexClientError, ItemFailure};
use crate::kafka::{highest_offsets, EventSource, KafkaIntegrationError, LogRecord, RecordOffset};
use crate::models::{derive_id, Event, IndexableDocument};

/// Topic used by the in-memory log
pub const TEST_TOPIC: &str = "qubic-events";

/// A test event for the given tick
pub fn test_event(epoch: u32, tick: u32, event_id: u64) -> Event {
    Event {
        epoch,
        tick,
        event_id,
        event_digest: u64::from(tick) * 1_000 + event_id,
        transaction_hash: format!("tx{:056}", event_id),
        event_type: 1,
        event_size: 8,
        event_data: "AQIDBAUGBwg=".to_string(),
    }
}

/// Raw record bytes for an event, as a producer would publish them
pub fn event_payload(event: &Event) -> Vec<u8> {
    serde_json::to_vec(event).expect("test event serializes")
}

/// An indexable document for a test event at the given tick
pub fn document_for_tick(tick: u32) -> IndexableDocument {
    let event = test_event(1, tick, u64::from(tick));
    IndexableDocument::new(
        derive_id(&event).expect("test event identity"),
        event_payload(&event),
    )
}

#[derive(Debug, Default)]
struct MemoryIndexState {
    documents: BTreeMap<String, Vec<u8>>,
    rejected: HashSet<String>,
    failing_requests: usize,
    requests: usize,
}

/// In-memory index with injectable failures
#[derive(Debug, Clone, Default)]
pub struct MemoryIndexClient {
    state: Arc<Mutex<MemoryIndexState>>,
    latency: Duration,
}

impl MemoryIndexClient {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every bulk request
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Reject each given document the next time it is written
    pub fn reject_once<I, T>(&self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut state = self.state.lock().unwrap();
        state
            .rejected
            .extend(ids.into_iter().map(|id| id.as_ref().to_string()));
    }

    /// Fail the next `n` bulk requests as a whole
    pub fn fail_requests(&self, n: usize) {
        self.state.lock().unwrap().failing_requests = n;
    }

    /// Number of bulk requests received
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    /// Number of distinct documents stored
    pub fn document_count(&self) -> usize {
        self.state.lock().unwrap().documents.len()
    }

    /// Stored payload of a document
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().documents.get(id).cloned()
    }

    /// Copy of the whole index
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().unwrap().documents.clone()
    }
}

#[async_trait]
impl IndexClient for MemoryIndexClient {
    async fn bulk_upsert(
        &self,
        documents: &[IndexableDocument],
    ) -> Result<BulkResponse, IndexClientError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        if state.failing_requests > 0 {
            state.failing_requests -= 1;
            return Err(IndexClientError::Response {
                status: 503,
                message: "cluster unavailable".to_string(),
            });
        }

        let mut response = BulkResponse::default();
        for (position, document) in documents.iter().enumerate() {
            response.bytes += document.payload.len() as u64;
            if state.rejected.remove(document.id.as_str()) {
                response.failures.push(ItemFailure {
                    position,
                    id: document.id.to_string(),
                    reason: "mapper_parsing_exception: rejected by test".to_string(),
                });
                continue;
            }
            state
                .documents
                .insert(document.id.to_string(), document.payload.clone());
        }

        Ok(response)
    }
}

#[derive(Debug, Default)]
struct MemoryLogState {
    records: Vec<LogRecord>,
    next_offset: BTreeMap<i32, i64>,
    committed: BTreeMap<i32, i64>,
    acknowledgements: Vec<Vec<RecordOffset>>,
    failing_polls: usize,
    polls: usize,
}

/// In-memory partitioned log with at-least-once delivery
///
/// A poll hands out the oldest records above each partition's committed
/// offset, so anything not acknowledged is delivered again.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSource {
    state: Arc<Mutex<MemoryLogState>>,
    block_when_empty: bool,
}

impl MemoryEventSource {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose polls wait forever when nothing is available
    pub fn blocking() -> Self {
        Self {
            block_when_empty: true,
            ..Self::default()
        }
    }

    /// Append a raw record to a partition
    pub fn push(&self, partition: i32, payload: Vec<u8>) -> RecordOffset {
        let mut state = self.state.lock().unwrap();
        let next = state.next_offset.entry(partition).or_insert(0);
        let offset = *next;
        *next += 1;

        let record = LogRecord {
            topic: TEST_TOPIC.to_string(),
            partition,
            offset,
            payload,
        };
        let position = record.position();
        state.records.push(record);
        position
    }

    /// Append an event to a partition
    pub fn push_event(&self, partition: i32, event: &Event) -> RecordOffset {
        self.push(partition, event_payload(event))
    }

    /// Fail the next `n` polls
    pub fn fail_polls(&self, n: usize) {
        self.state.lock().unwrap().failing_polls = n;
    }

    /// Every acknowledge call received, in order
    pub fn acknowledgements(&self) -> Vec<Vec<RecordOffset>> {
        self.state.lock().unwrap().acknowledgements.clone()
    }

    /// Number of polls received
    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    /// Number of records not yet acknowledged
    pub fn uncommitted_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .filter(|r| r.offset >= state.committed.get(&r.partition).copied().unwrap_or(0))
            .count()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn poll_batch(
        &self,
        max_records: usize,
    ) -> Result<Vec<LogRecord>, KafkaIntegrationError> {
        let batch = {
            let mut state = self.state.lock().unwrap();
            state.polls += 1;
            if state.failing_polls > 0 {
                state.failing_polls -= 1;
                return Err(KafkaIntegrationError::FetchError(
                    "broker not available".to_string(),
                ));
            }

            state
                .records
                .iter()
                .filter(|r| r.offset >= state.committed.get(&r.partition).copied().unwrap_or(0))
                .take(max_records)
                .cloned()
                .collect::<Vec<_>>()
        };

        if batch.is_empty() && self.block_when_empty {
            std::future::pending::<()>().await;
        }
        Ok(batch)
    }

    async fn acknowledge(&self, offsets: &[RecordOffset]) -> Result<(), KafkaIntegrationError> {
        let mut state = self.state.lock().unwrap();
        for ((_, partition), offset) in highest_offsets(offsets) {
            let committed = state.committed.entry(partition).or_insert(0);
            *committed = (*committed).max(offset + 1);
        }
        state.acknowledgements.push(offsets.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_log_redelivers_until_acknowledged() {
        let source = MemoryEventSource::new();
        source.push_event(0, &test_event(1, 10, 1));
        source.push_event(0, &test_event(1, 11, 2));

        let first = source.poll_batch(10).await.unwrap();
        assert_eq!(first.len(), 2);

        let again = source.poll_batch(10).await.unwrap();
        assert_eq!(again, first);

        let offsets: Vec<_> = again.iter().map(LogRecord::position).collect();
        source.acknowledge(&offsets).await.unwrap();
        assert!(source.poll_batch(10).await.unwrap().is_empty());
        assert_eq!(source.uncommitted_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_log_respects_max_records() {
        let source = MemoryEventSource::new();
        for tick in 0..5 {
            source.push_event(0, &test_event(1, tick, u64::from(tick)));
        }
        assert_eq!(source.poll_batch(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_memory_index_upserts() {
        let client = MemoryIndexClient::new();
        let doc = document_for_tick(7);

        client.bulk_upsert(&[doc.clone()]).await.unwrap();
        client.bulk_upsert(&[doc.clone()]).await.unwrap();

        assert_eq!(client.document_count(), 1);
        assert_eq!(client.get(doc.id.as_str()), Some(doc.payload));
        assert_eq!(client.request_count(), 2);
    }
}
