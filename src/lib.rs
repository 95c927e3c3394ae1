//! Qubic events consumer library
//!
//! Moves ledger events from a Kafka topic into an Elasticsearch index with
//! at-least-once delivery. Documents are keyed by an identifier derived from
//! event content, so re-delivered records overwrite themselves.

pub mod api;
pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod kafka;
pub mod logging;
pub mod models;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use error::{Error, Result};

pub use index::{BatchIndexer, ElasticClient, IndexClient};
pub use ingest::{CycleError, EventConsumer, IngestMetrics, ProgressTracker};
pub use kafka::{EventSource, KafkaEventSource};
pub use models::{derive_id, DocumentId, Event, IndexableDocument};

// Re-export API server functions
pub use api::server::{create_router, create_server, shutdown_signal};

pub use api::{AppState, ComponentHealth, HealthState, HealthStatus};
