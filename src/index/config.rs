//! Elasticsearch configuration module

use envconfig::Envconfig;
use std::time::Duration;

/// Elasticsearch configuration settings
#[derive(Debug, Clone, Envconfig)]
pub struct ElasticConfig {
    /// Cluster addresses (comma-separated)
    #[envconfig(from = "ELASTIC_ADDRESSES", default = "https://localhost:9200")]
    pub addresses: String,

    /// Basic auth user
    #[envconfig(from = "ELASTIC_USERNAME", default = "qubic-ingestion")]
    pub username: String,

    /// Basic auth password
    #[envconfig(from = "ELASTIC_PASSWORD", default = "")]
    pub password: String,

    /// Index (alias) the events are written to
    #[envconfig(from = "ELASTIC_INDEX_NAME", default = "qubic-events-alias")]
    pub index_name: String,

    /// PEM file with the cluster's CA certificate
    #[envconfig(from = "ELASTIC_CA_CERT_PATH")]
    pub ca_cert_path: Option<String>,

    /// Per request timeout in seconds
    #[envconfig(from = "ELASTIC_REQUEST_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,

    /// Upper bound for concurrent bulk requests
    #[envconfig(from = "ELASTIC_MAX_WORKERS", default = "8")]
    pub max_workers: usize,

    /// Upper bound for a single bulk request body
    #[envconfig(from = "ELASTIC_FLUSH_BYTES", default = "5242880")]
    pub flush_bytes: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            addresses: "https://localhost:9200".to_string(),
            username: "qubic-ingestion".to_string(),
            password: String::new(),
            index_name: "qubic-events-alias".to_string(),
            ca_cert_path: None,
            request_timeout_secs: 30,
            max_workers: 8,
            flush_bytes: 5 * 1024 * 1024,
        }
    }
}

impl ElasticConfig {
    /// Get addresses as a vector
    pub fn addresses_list(&self) -> Vec<String> {
        self.addresses
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
