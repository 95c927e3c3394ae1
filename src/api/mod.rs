//! API module for the events consumer
//!
//! This module contains the HTTP endpoints (liveness, ingestion status and
//! Prometheus metrics) and the server setup.

pub mod health;
pub mod server;

pub use health::{health_check, metrics_handler, status, AppState, HealthState};
pub use server::{create_router, create_server, shutdown_signal};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ingest::{MetricsSnapshot, ProgressCursor};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: HealthStatus,
    /// Optional message
    pub message: Option<String>,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Ingestion status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Overall status across components
    pub status: HealthStatus,
    pub version: &'static str,
    /// Last fully indexed position
    pub cursor: ProgressCursor,
    pub counters: MetricsSnapshot,
    /// Individual component checks
    pub components: HashMap<String, ComponentHealth>,
    pub timestamp: DateTime<Utc>,
}

/// Component health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: HealthStatus,
    /// Optional detail, e.g. the last error
    pub message: Option<String>,
    /// Last update timestamp
    pub last_check: DateTime<Utc>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded but operational
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code
    pub fn to_status_code(&self) -> axum::http::StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => axum::http::StatusCode::OK,
            HealthStatus::Unhealthy => axum::http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        assert_eq!(
            HealthStatus::Healthy.to_status_code(),
            axum::http::StatusCode::OK
        );
        assert_eq!(
            HealthStatus::Degraded.to_status_code(),
            axum::http::StatusCode::OK
        );
        assert_eq!(
            HealthStatus::Unhealthy.to_status_code(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
