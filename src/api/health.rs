//! Health, status and metrics endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::{ComponentHealth, HealthResponse, HealthStatus, StatusResponse};
use crate::ingest::{IngestMetrics, ProgressCursor};
use crate::kafka::KafkaClientMetrics;

/// Component health shared between the ingestion loop and the server
#[derive(Clone, Default)]
pub struct HealthState {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update component health status
    pub async fn update_component(
        &self,
        name: impl Into<String>,
        status: HealthStatus,
        message: Option<String>,
    ) {
        let mut components = self.components.write().await;
        components.insert(
            name.into(),
            ComponentHealth {
                status,
                message,
                last_check: Utc::now(),
            },
        );
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn components(&self) -> HashMap<String, ComponentHealth> {
        self.components.read().await.clone()
    }

    /// Get overall health status
    pub async fn get_status(&self) -> HealthStatus {
        let components = self.components.read().await;

        if components.values().any(|c| c.status == HealthStatus::Unhealthy) {
            return HealthStatus::Unhealthy;
        }

        if components.values().any(|c| c.status == HealthStatus::Degraded) {
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }
}

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub health: HealthState,
    pub metrics: Arc<IngestMetrics>,
    /// Kafka client statistics, absent when ingestion is disabled
    pub kafka: Option<Arc<KafkaClientMetrics>>,
    /// Prefix of exported metric names
    pub namespace: String,
}

/// Basic liveness check endpoint
///
/// Returns 200 OK while the process is up; external dependencies are not
/// checked.
pub async fn health_check() -> Response {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Service is running".to_string()),
        timestamp: Utc::now(),
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Ingestion status: published cursor, counters and component health
pub async fn status(State(state): State<AppState>) -> Response {
    let counters = state.metrics.snapshot();
    let overall = state.health.get_status().await;

    let response = StatusResponse {
        status: overall,
        version: env!("CARGO_PKG_VERSION"),
        cursor: ProgressCursor {
            epoch: counters.processed_epoch,
            tick: counters.processed_tick,
        },
        counters,
        components: state.health.components().await,
        timestamp: Utc::now(),
    };

    (overall.to_status_code(), Json(response)).into_response()
}

/// Prometheus text exposition of the ingestion and Kafka client metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut body = state.metrics.render_prometheus(&state.namespace);
    if let Some(kafka) = &state.kafka {
        body.push_str(&kafka.render_prometheus(&state.namespace));
    }

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}
