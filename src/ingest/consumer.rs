//! Consume cycles and the long-running ingestion loop

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CycleError, CycleReport, ProgressTracker};
use crate::api::{HealthState, HealthStatus};
use crate::error::Result;
use crate::index::{BatchIndexer, IndexError};
use crate::kafka::EventSource;
use crate::models::{derive_id, Event, IndexableDocument};

/// Health component updated after every cycle
pub const INGESTION_COMPONENT: &str = "ingestion";

/// Delays between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePacing {
    /// Wait after a committed cycle
    pub cycle_delay: Duration,
    /// First wait after a failed cycle
    pub retry_initial: Duration,
    /// Upper bound of the wait after repeated failures
    pub retry_max: Duration,
}

impl Default for CyclePacing {
    fn default() -> Self {
        Self {
            cycle_delay: Duration::from_secs(1),
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
        }
    }
}

impl CyclePacing {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.retry_initial,
            current_interval: self.retry_initial,
            max_interval: self.retry_max.max(self.retry_initial),
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Moves batches from the event log into the search index
///
/// A batch is acknowledged only after every document in it was indexed.
/// Anything short of that leaves the batch unacknowledged so the log hands
/// it out again; re-indexing is harmless because document ids are derived
/// from event content.
pub struct EventConsumer {
    source: Arc<dyn EventSource>,
    indexer: BatchIndexer,
    tracker: ProgressTracker,
    batch_size: usize,
    pacing: CyclePacing,
    health: Option<HealthState>,
}

impl EventConsumer {
    pub fn new(
        source: Arc<dyn EventSource>,
        indexer: BatchIndexer,
        tracker: ProgressTracker,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            indexer,
            tracker,
            batch_size: batch_size.max(1),
            pacing: CyclePacing::default(),
            health: None,
        }
    }

    pub fn with_pacing(mut self, pacing: CyclePacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Report cycle outcomes to the given health state
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Fetch, index and acknowledge one batch
    ///
    /// Records are parsed in arrival order. A record that cannot be parsed
    /// or identified aborts the whole cycle before anything is written.
    /// Progress is observed for a record only once it parsed and got its
    /// id, so records ahead of a bad one stay counted after the abort while
    /// the bad record and those behind it do not.
    pub async fn consume_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> std::result::Result<CycleReport, CycleError> {
        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Cancelled),
            polled = self.source.poll_batch(self.batch_size) => polled.map_err(CycleError::Fetch)?,
        };

        if records.is_empty() {
            debug!("No new records");
            return Ok(CycleReport {
                cursor: self.tracker.cursor(),
                ..CycleReport::default()
            });
        }

        let fetched = records.len();
        let mut documents = Vec::with_capacity(fetched);
        let mut offsets = Vec::with_capacity(fetched);

        for record in records {
            let event = Event::from_slice(&record.payload).map_err(|source| CycleError::Parse {
                partition: record.partition,
                offset: record.offset,
                source,
            })?;
            let id = derive_id(&event).map_err(|source| CycleError::Identity {
                partition: record.partition,
                offset: record.offset,
                source,
            })?;

            offsets.push(record.position());
            documents.push(IndexableDocument::new(id, record.payload));
            self.tracker.observe(event.epoch, event.tick);
            self.tracker.message_processed();
        }

        let stats = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Cancelled),
            indexed = self.indexer.index_batch(documents) => indexed.map_err(index_failure)?,
        };

        self.tracker.publish();
        self.source
            .acknowledge(&offsets)
            .await
            .map_err(CycleError::Commit)?;

        let cursor = self.tracker.cursor();
        info!(
            records = fetched,
            requests = stats.requests,
            bytes = stats.bytes,
            duration_ms = stats.duration.as_millis() as u64,
            epoch = cursor.epoch,
            tick = cursor.tick,
            "Batch indexed and committed"
        );

        Ok(CycleReport {
            records: fetched,
            cursor,
            stats,
        })
    }

    /// Run cycles until `cancel` fires
    ///
    /// Retryable failures are logged and retried after an exponential
    /// backoff. A failure that cannot be retried ends the loop, and the
    /// ingestion component is reported unhealthy once the loop stops.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            workers = self.indexer.workers(),
            "Starting event processing"
        );

        let mut backoff = self.pacing.backoff();

        loop {
            let delay = match self.consume_cycle(&cancel).await {
                Ok(report) => {
                    backoff.reset();
                    self.report_health(
                        HealthStatus::Healthy,
                        format!("tick {}", report.cursor.tick),
                    )
                    .await;
                    self.pacing.cycle_delay
                },
                Err(e) if !e.is_retryable() => break,
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(self.pacing.retry_max);
                    error!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Ingestion cycle failed"
                    );
                    self.report_health(HealthStatus::Degraded, e.to_string()).await;
                    delay
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
            }
        }

        let cursor = self.tracker.cursor();
        info!(epoch = cursor.epoch, tick = cursor.tick, "Event processing stopped");
        self.report_health(
            HealthStatus::Unhealthy,
            format!("Event processing stopped at tick {}", cursor.tick),
        )
        .await;
        Ok(())
    }

    async fn report_health(&self, status: HealthStatus, message: String) {
        if let Some(health) = &self.health {
            health
                .update_component(INGESTION_COMPONENT, status, Some(message))
                .await;
        }
    }
}

/// Log every rejected document and reduce the failure to its counts
fn index_failure(err: IndexError) -> CycleError {
    match err {
        IndexError::PartialFailure { failed, total } => {
            for failure in &failed {
                error!(
                    document_id = %failure.id,
                    payload = %String::from_utf8_lossy(&failure.payload),
                    reason = %failure.reason,
                    "Failed to index document"
                );
            }
            CycleError::PartialIndexFailure {
                failed: failed.len(),
                total,
            }
        },
        IndexError::Transport(reason) => {
            warn!(reason = %reason, "No bulk request reached the index");
            CycleError::Transport(reason)
        },
    }
}
