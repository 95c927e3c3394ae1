//! Kafka configuration module

use envconfig::Envconfig;
use std::time::Duration;

/// Kafka configuration settings
#[derive(Debug, Clone, Envconfig)]
pub struct KafkaConfig {
    /// Kafka broker addresses (comma-separated)
    #[envconfig(from = "KAFKA_BROKERS", default = "localhost:9092")]
    pub brokers: String,

    /// Consumer group ID
    #[envconfig(from = "KAFKA_CONSUMER_GROUP", default = "qubic-elastic")]
    pub consumer_group: String,

    /// Topic to consume events from
    #[envconfig(from = "KAFKA_EVENTS_TOPIC", default = "qubic-events")]
    pub events_topic: String,

    /// Where to start when the group has no committed offset
    #[envconfig(from = "KAFKA_AUTO_OFFSET_RESET", default = "earliest")]
    pub auto_offset_reset: String,

    /// Session timeout in milliseconds
    #[envconfig(from = "KAFKA_SESSION_TIMEOUT_MS", default = "30000")]
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    #[envconfig(from = "KAFKA_MAX_POLL_INTERVAL_MS", default = "300000")]
    pub max_poll_interval_ms: u32,

    /// Maximum records fetched per ingestion cycle
    #[envconfig(from = "KAFKA_BATCH_SIZE", default = "1000")]
    pub batch_size: usize,

    /// How long a poll waits for the first record
    #[envconfig(from = "KAFKA_POLL_TIMEOUT_MS", default = "1000")]
    pub poll_timeout_ms: u64,

    /// How long a poll keeps draining once records are flowing
    #[envconfig(from = "KAFKA_POLL_LINGER_MS", default = "50")]
    pub poll_linger_ms: u64,

    /// Fetch min bytes
    #[envconfig(from = "KAFKA_FETCH_MIN_BYTES", default = "1")]
    pub fetch_min_bytes: i32,

    /// Fetch max wait ms
    #[envconfig(from = "KAFKA_FETCH_MAX_WAIT_MS", default = "500")]
    pub fetch_max_wait_ms: i32,

    /// Client statistics emission interval, 0 disables
    #[envconfig(from = "KAFKA_STATISTICS_INTERVAL_MS", default = "5000")]
    pub statistics_interval_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "qubic-elastic".to_string(),
            events_topic: "qubic-events".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30000,   // 30 seconds
            max_poll_interval_ms: 300000, // 5 minutes
            batch_size: 1000,
            poll_timeout_ms: 1000,
            poll_linger_ms: 50,
            fetch_min_bytes: 1,
            fetch_max_wait_ms: 500,
            statistics_interval_ms: 5000,
        }
    }
}

impl KafkaConfig {
    /// Get session timeout as Duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms as u64)
    }

    /// Get max poll interval as Duration
    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms as u64)
    }

    /// Get poll timeout as Duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Get poll linger as Duration
    pub fn poll_linger(&self) -> Duration {
        Duration::from_millis(self.poll_linger_ms)
    }

    /// Build rdkafka consumer configuration
    ///
    /// Auto commit is always off: offsets are committed only after the
    /// batch they belong to was indexed.
    pub fn build_consumer_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                self.max_poll_interval_ms.to_string(),
            )
            .set("fetch.min.bytes", self.fetch_min_bytes.to_string())
            .set("fetch.wait.max.ms", self.fetch_max_wait_ms.to_string())
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &self.auto_offset_reset);

        if self.statistics_interval_ms > 0 {
            config.set(
                "statistics.interval.ms",
                self.statistics_interval_ms.to_string(),
            );
        }

        config
    }
}
