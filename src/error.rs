//! Error handling module for the events consumer
//!
//! This module defines the crate-level error type returned by startup and
//! the HTTP server. Component errors (log source, index client) convert
//! into it so that `main` deals with a single type.

use thiserror::Error;

use crate::index::IndexClientError;
use crate::kafka::KafkaIntegrationError;

/// Result type alias for consumer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the events consumer
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka related errors
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaIntegrationError),

    /// Search index errors
    #[error("Index error: {0}")]
    Index(String),

    /// HTTP server errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<envconfig::Error> for Error {
    fn from(err: envconfig::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<IndexClientError> for Error {
    fn from(err: IndexClientError) -> Self {
        Error::Index(err.to_string())
    }
}
