//! Ingestion loop
//!
//! This module provides:
//! - The `EventConsumer`, which turns fetched log records into index writes
//!   and acknowledges them only once the whole batch is indexed
//! - Progress tracking of the highest tick seen, exported as metrics

mod consumer;
mod progress;

pub use consumer::{CyclePacing, EventConsumer, INGESTION_COMPONENT};
pub use progress::{IngestMetrics, MetricsSnapshot, ProgressCursor, ProgressTracker};

use thiserror::Error;

use crate::index::BulkStats;
use crate::kafka::KafkaIntegrationError;
use crate::models::IdentityError;

/// Reasons a consume cycle ended without acknowledging its batch
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Fetching batch failed: {0}")]
    Fetch(#[source] KafkaIntegrationError),

    #[error("Invalid event at partition {partition} offset {offset}: {source}")]
    Parse {
        partition: i32,
        offset: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Deriving document id at partition {partition} offset {offset}: {source}")]
    Identity {
        partition: i32,
        offset: i64,
        #[source]
        source: IdentityError,
    },

    #[error("{failed} errors indexing [{total}] documents")]
    PartialIndexFailure { failed: usize, total: usize },

    #[error("Index transport failure: {0}")]
    Transport(String),

    #[error("Committing offsets failed: {0}")]
    Commit(#[source] KafkaIntegrationError),

    #[error("Cycle cancelled")]
    Cancelled,
}

impl CycleError {
    /// Whether the loop should try again after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CycleError::Cancelled)
    }
}

/// Outcome of a committed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records fetched and acknowledged
    pub records: usize,
    /// Cursor after the cycle
    pub cursor: ProgressCursor,
    pub stats: BulkStats,
}
