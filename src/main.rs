//! Qubic events consumer
//!
//! Consumes ledger events from Kafka and indexes them into Elasticsearch,
//! serving liveness, status and metrics over HTTP.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use qubic_events_consumer::{
    api::{self, AppState, HealthState},
    config::Config,
    error::Result,
    ingest::{EventConsumer, IngestMetrics, ProgressTracker},
    logging, BatchIndexer, ElasticClient, KafkaEventSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env()?;

    // Validate configuration
    config.validate()?;

    // Initialize logging/tracing
    logging::init_tracing(&config.server.log_level, config.server.is_production())?;

    // Log configuration (with sensitive data masked)
    config.log_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Qubic events consumer"
    );

    let shutdown = CancellationToken::new();
    let health = HealthState::new();
    let metrics = Arc::new(IngestMetrics::new());

    let mut kafka_metrics = None;

    let consumer_task = if config.sync.enabled {
        let source = Arc::new(KafkaEventSource::new(&config.kafka)?);
        kafka_metrics = Some(source.client_metrics());
        let client = Arc::new(ElasticClient::new(&config.elastic)?);
        let indexer = BatchIndexer::new(
            client,
            config.elastic.max_workers,
            config.elastic.flush_bytes,
        );

        let consumer = EventConsumer::new(
            source,
            indexer,
            ProgressTracker::new(Arc::clone(&metrics)),
            config.kafka.batch_size,
        )
        .with_pacing(config.sync.pacing())
        .with_health(health.clone());

        Some(tokio::spawn(consumer.run(shutdown.clone())))
    } else {
        tracing::info!("Event processing disabled");
        None
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        api::shutdown_signal().await;
        signal_token.cancel();
    });

    let state = AppState {
        health,
        metrics,
        kafka: kafka_metrics,
        namespace: config.metrics.namespace.clone(),
    };
    let served = api::create_server(&config, state, shutdown.clone()).await;

    // The server may also stop on its own error
    shutdown.cancel();
    if let Some(task) = consumer_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Event processing failed"),
            Err(e) => tracing::error!(error = %e, "Event processing task panicked"),
            Ok(Ok(())) => {},
        }
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
