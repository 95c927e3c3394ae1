//! Kafka event source with manual offset management

use super::{
    highest_offsets, EventSource, KafkaClientMetrics, KafkaConfig, KafkaIntegrationError,
    LogRecord, RecordOffset, StatsContext,
};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

type PendingOffsets = BTreeMap<(String, i32), i64>;

/// Event source backed by an rdkafka consumer group member
pub struct KafkaEventSource {
    /// Kafka consumer instance
    consumer: StreamConsumer<StatsContext>,

    /// Subscribed topic
    topic: String,

    /// Wait for the first record of a batch
    poll_timeout: Duration,

    /// Wait for each following record of a batch
    poll_linger: Duration,

    /// First offset per partition handed out and not yet acknowledged
    pending: Mutex<PendingOffsets>,

    /// Filled by the client's statistics callback
    client_metrics: Arc<KafkaClientMetrics>,
}

impl KafkaEventSource {
    /// Create the consumer and subscribe to the events topic
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaIntegrationError> {
        let client_metrics = Arc::new(KafkaClientMetrics::new());
        let consumer: StreamConsumer<StatsContext> = config
            .build_consumer_config()
            .create_with_context(StatsContext::new(Arc::clone(&client_metrics)))?;
        consumer.subscribe(&[&config.events_topic])?;

        info!(
            topic = %config.events_topic,
            group = %config.consumer_group,
            brokers = %config.brokers,
            "Subscribed to events topic"
        );

        Ok(Self {
            consumer,
            topic: config.events_topic.clone(),
            poll_timeout: config.poll_timeout(),
            poll_linger: config.poll_linger(),
            pending: Mutex::new(BTreeMap::new()),
            client_metrics,
        })
    }

    /// Subscribed topic name
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Statistics reported by the underlying Kafka client
    pub fn client_metrics(&self) -> Arc<KafkaClientMetrics> {
        Arc::clone(&self.client_metrics)
    }

    fn pending(&self) -> MutexGuard<'_, PendingOffsets> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, records: &[LogRecord]) {
        let mut pending = self.pending();
        for record in records {
            pending
                .entry((record.topic.clone(), record.partition))
                .or_insert(record.offset);
        }
    }

    /// Seek back to the start of every batch that was never acknowledged
    ///
    /// Fails while any owned partition could not be rewound, so no record
    /// past an unacknowledged one is handed out.
    fn rewind_unacknowledged(&self) -> Result<(), KafkaIntegrationError> {
        let mut pending = self.pending();
        if pending.is_empty() {
            return Ok(());
        }

        // Without a readable assignment every partition counts as owned
        let assignment = self.consumer.assignment().ok();
        let failures = rewind_pending(
            &mut pending,
            |topic, partition, offset| {
                self.consumer
                    .seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
            },
            |topic, partition| {
                assignment
                    .as_ref()
                    .map_or(true, |tpl| tpl.find_partition(topic, partition).is_some())
            },
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(KafkaIntegrationError::FetchError(format!(
                "rewinding unacknowledged partitions failed: {}",
                failures.join("; ")
            )))
        }
    }
}

/// Seek each pending partition back to its first unacknowledged offset
///
/// An entry is dropped when its seek succeeds or its partition is no longer
/// owned; the new owner resumes from the committed offset. Entries whose
/// seek failed stay pending and are returned as error descriptions.
fn rewind_pending<S, O>(pending: &mut PendingOffsets, mut seek: S, owned: O) -> Vec<String>
where
    S: FnMut(&str, i32, i64) -> Result<(), KafkaError>,
    O: Fn(&str, i32) -> bool,
{
    let mut failures = Vec::new();

    pending.retain(|(topic, partition), offset| {
        if !owned(topic, *partition) {
            debug!(
                topic = %topic,
                partition = *partition,
                offset = *offset,
                "Partition no longer assigned, dropping unacknowledged offset"
            );
            return false;
        }

        match seek(topic, *partition, *offset) {
            Ok(()) => {
                debug!(
                    topic = %topic,
                    partition = *partition,
                    offset = *offset,
                    "Rewound partition to unacknowledged offset"
                );
                false
            },
            Err(e) => {
                warn!(
                    topic = %topic,
                    partition = *partition,
                    offset = *offset,
                    error = %e,
                    "Failed to rewind partition"
                );
                failures.push(format!("{}[{}]@{}: {}", topic, partition, offset, e));
                true
            },
        }
    });

    failures
}

fn to_record(message: &BorrowedMessage<'_>) -> LogRecord {
    LogRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn poll_batch(
        &self,
        max_records: usize,
    ) -> Result<Vec<LogRecord>, KafkaIntegrationError> {
        self.rewind_unacknowledged()?;

        let mut records = Vec::new();
        let mut wait = self.poll_timeout;

        while records.len() < max_records {
            match tokio::time::timeout(wait, self.consumer.recv()).await {
                Err(_elapsed) => break,
                Ok(Ok(message)) => records.push(to_record(&message)),
                Ok(Err(e)) => {
                    // rdkafka retries transient errors itself; what reaches
                    // us needs an operator's attention
                    self.track(&records);
                    return Err(KafkaIntegrationError::FetchError(e.to_string()));
                },
            }
            wait = self.poll_linger;
        }

        self.track(&records);
        debug!(count = records.len(), "Polled records");
        Ok(records)
    }

    async fn acknowledge(&self, offsets: &[RecordOffset]) -> Result<(), KafkaIntegrationError> {
        if offsets.is_empty() {
            return Ok(());
        }

        let highest = highest_offsets(offsets);
        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), offset) in &highest {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))
                .map_err(|e| KafkaIntegrationError::OffsetCommitError(e.to_string()))?;
        }

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| KafkaIntegrationError::OffsetCommitError(e.to_string()))?;

        let mut pending = self.pending();
        for key in highest.keys() {
            pending.remove(key);
        }

        debug!(partitions = highest.len(), records = offsets.len(), "Committed offsets");
        Ok(())
    }
}
