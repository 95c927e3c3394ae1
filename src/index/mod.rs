//! Search index integration
//!
//! This module provides:
//! - The `IndexClient` capability: one bulk upsert request, per-item outcomes
//! - An Elasticsearch implementation over the `_bulk` API
//! - The `BatchIndexer`, which fans a batch out over a bounded worker pool

mod bulk;
mod config;
mod elastic;

pub use bulk::{BatchIndexer, BulkStats};
pub use config::ElasticConfig;
pub use elastic::{decode_bulk_response, encode_bulk_body, ElasticClient};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DocumentId, IndexableDocument};

/// Errors from a single bulk request
#[derive(Debug, Error)]
pub enum IndexClientError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Response error: status={status}, message={message}")]
    Response { status: u16, message: String },

    #[error("Encoding bulk request failed: {0}")]
    Encode(String),

    #[error("Invalid bulk response: {0}")]
    Decode(String),

    #[error("Client setup failed: {0}")]
    Setup(String),
}

/// A document the index rejected within an otherwise successful request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position of the document in the request
    pub position: usize,
    pub id: String,
    pub reason: String,
}

/// Outcome of one bulk request
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    pub failures: Vec<ItemFailure>,
    /// Request body size
    pub bytes: u64,
}

/// Bulk upsert capability of a search index
///
/// Every document is written with "index" semantics keyed by its id, so
/// writing the same document twice leaves the index unchanged.
#[async_trait]
pub trait IndexClient: Send + Sync {
    async fn bulk_upsert(
        &self,
        documents: &[IndexableDocument],
    ) -> Result<BulkResponse, IndexClientError>;
}

/// A document that could not be written, with enough context to replay it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub id: DocumentId,
    pub payload: Vec<u8>,
    pub reason: String,
}

/// Errors from indexing a whole batch
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{} errors indexing [{total}] documents", .failed.len())]
    PartialFailure {
        failed: Vec<DocumentFailure>,
        total: usize,
    },

    #[error("Index transport failure: {0}")]
    Transport(String),
}
