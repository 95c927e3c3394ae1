//! Kafka integration module for event streaming
//!
//! This module provides:
//! - The `EventSource` capability the ingestion loop pulls batches from
//! - An rdkafka consumer with manual offset management
//! - Re-delivery of batches that were fetched but never acknowledged
//! - Client statistics for the metrics endpoint

mod config;
mod consumer;
mod stats;

pub use config::KafkaConfig;
pub use consumer::KafkaEventSource;
pub use stats::{ClientStatsSample, KafkaClientMetrics, StatsContext};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use std::collections::BTreeMap;
use thiserror::Error;

/// Kafka-specific error types
#[derive(Debug, Error)]
pub enum KafkaIntegrationError {
    #[error("Kafka connection error: {0}")]
    ConnectionError(#[from] KafkaError),

    #[error("Fetching records failed: {0}")]
    FetchError(String),

    #[error("Offset commit failed: {0}")]
    OffsetCommitError(String),
}

/// A raw record as delivered by the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Position of this record in the log
    pub fn position(&self) -> RecordOffset {
        RecordOffset {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Position of a record that can be acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Highest offset per (topic, partition) among the given positions
pub fn highest_offsets(offsets: &[RecordOffset]) -> BTreeMap<(String, i32), i64> {
    let mut highest: BTreeMap<(String, i32), i64> = BTreeMap::new();
    for o in offsets {
        highest
            .entry((o.topic.clone(), o.partition))
            .and_modify(|current| *current = (*current).max(o.offset))
            .or_insert(o.offset);
    }
    highest
}

/// A partitioned log the ingestion loop consumes from
///
/// Records handed out by `poll_batch` and not acknowledged must be handed
/// out again by a later poll.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch up to `max_records` records; an empty batch means nothing was
    /// available before the poll timeout
    async fn poll_batch(&self, max_records: usize)
        -> Result<Vec<LogRecord>, KafkaIntegrationError>;

    /// Mark the given records as consumed so they are not re-delivered
    async fn acknowledge(&self, offsets: &[RecordOffset]) -> Result<(), KafkaIntegrationError>;
}
