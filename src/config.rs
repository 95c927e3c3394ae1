//! Configuration module for the events consumer
//!
//! This module handles loading and validating configuration from environment
//! variables. The log source and index sections live next to the code that
//! uses them and are nested here.

use envconfig::Envconfig;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::index::ElasticConfig;
use crate::ingest::CyclePacing;
use crate::kafka::KafkaConfig;

/// Main configuration structure
#[derive(Debug, Clone, Envconfig)]
pub struct Config {
    /// Server configuration
    #[envconfig(nested)]
    pub server: ServerConfig,

    /// Event log configuration
    #[envconfig(nested)]
    pub kafka: KafkaConfig,

    /// Search index configuration
    #[envconfig(nested)]
    pub elastic: ElasticConfig,

    /// Ingestion loop configuration
    #[envconfig(nested)]
    pub sync: SyncConfig,

    /// Metrics configuration
    #[envconfig(nested)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Envconfig)]
pub struct ServerConfig {
    /// Host to bind to
    #[envconfig(from = "HOST", default = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[envconfig(from = "PORT", default = "9999")]
    pub port: u16,

    /// Log level
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[envconfig(from = "ENVIRONMENT", default = "development")]
    pub environment: String,

    /// Request timeout in seconds
    #[envconfig(from = "REQUEST_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9999,
            log_level: "info".to_string(),
            environment: "development".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Get the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Ingestion loop configuration
#[derive(Debug, Clone, Envconfig)]
pub struct SyncConfig {
    /// Run the ingestion loop
    #[envconfig(from = "SYNC_ENABLED", default = "true")]
    pub enabled: bool,

    /// Pause after a committed cycle
    #[envconfig(from = "SYNC_CYCLE_DELAY_MS", default = "1000")]
    pub cycle_delay_ms: u64,

    /// First retry delay after a failed cycle
    #[envconfig(from = "SYNC_RETRY_INITIAL_MS", default = "1000")]
    pub retry_initial_ms: u64,

    /// Maximum retry delay
    #[envconfig(from = "SYNC_RETRY_MAX_MS", default = "30000")]
    pub retry_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cycle_delay_ms: 1000,
            retry_initial_ms: 1000,
            retry_max_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn pacing(&self) -> CyclePacing {
        CyclePacing {
            cycle_delay: Duration::from_millis(self.cycle_delay_ms),
            retry_initial: Duration::from_millis(self.retry_initial_ms),
            retry_max: Duration::from_millis(self.retry_max_ms),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Envconfig)]
pub struct MetricsConfig {
    /// Serve the metrics endpoint
    #[envconfig(from = "METRICS_ENABLED", default = "true")]
    pub enabled: bool,

    /// Prefix of every exported metric
    #[envconfig(from = "METRICS_NAMESPACE", default = "qubic_kafka")]
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "qubic_kafka".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            kafka: KafkaConfig::default(),
            elastic: ElasticConfig::default(),
            sync: SyncConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        Config::init_from_env().map_err(Error::from)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("Server port cannot be 0"));
        }

        if self.kafka.brokers.trim().is_empty() {
            return Err(Error::config("Kafka brokers cannot be empty"));
        }

        if self.kafka.events_topic.trim().is_empty() {
            return Err(Error::config("Kafka events topic cannot be empty"));
        }

        if self.kafka.batch_size == 0 {
            return Err(Error::config("Kafka batch size must be at least 1"));
        }

        if self.elastic.addresses_list().is_empty() {
            return Err(Error::config("Elasticsearch addresses cannot be empty"));
        }

        if self.elastic.index_name.trim().is_empty() {
            return Err(Error::config("Elasticsearch index name cannot be empty"));
        }

        if self.elastic.max_workers == 0 {
            return Err(Error::config("Elasticsearch max workers must be at least 1"));
        }

        if self.sync.retry_max_ms < self.sync.retry_initial_ms {
            return Err(Error::config(
                "Sync retry max delay cannot be below the initial delay",
            ));
        }

        Ok(())
    }

    /// Log configuration (with sensitive data masked)
    pub fn log_config(&self) {
        tracing::info!(
            server_address = %self.server.address(),
            environment = %self.server.environment,
            log_level = %self.server.log_level,
            "Server configuration"
        );

        tracing::info!(
            brokers = %self.kafka.brokers,
            consumer_group = %self.kafka.consumer_group,
            events_topic = %self.kafka.events_topic,
            batch_size = self.kafka.batch_size,
            "Kafka configuration"
        );

        tracing::info!(
            addresses = %self.elastic.addresses,
            username = %self.elastic.username,
            password = %mask(&self.elastic.password),
            index = %self.elastic.index_name,
            max_workers = self.elastic.max_workers,
            flush_bytes = self.elastic.flush_bytes,
            "Elasticsearch configuration"
        );

        tracing::info!(
            enabled = self.sync.enabled,
            cycle_delay_ms = self.sync.cycle_delay_ms,
            retry_max_ms = self.sync.retry_max_ms,
            "Sync configuration"
        );

        tracing::info!(
            enabled = self.metrics.enabled,
            namespace = %self.metrics.namespace,
            "Metrics configuration"
        );
    }
}

/// Mask a secret for logging
fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***"
    }
}
