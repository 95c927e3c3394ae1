//! Kafka client statistics exported next to the ingestion metrics

use rdkafka::client::ClientContext;
use rdkafka::consumer::ConsumerContext;
use rdkafka::statistics::Statistics;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Figures taken from one librdkafka statistics report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStatsSample {
    pub received_messages: i64,
    pub received_bytes: i64,
    pub consumer_lag: i64,
    pub rebalances: i64,
    pub assigned_partitions: i64,
    pub reply_queue: i64,
}

impl ClientStatsSample {
    pub fn from_statistics(statistics: &Statistics) -> Self {
        // Partition -1 is librdkafka's internal unassigned partition, and a
        // lag of -1 means unknown
        let consumer_lag = statistics
            .topics
            .values()
            .flat_map(|topic| topic.partitions.values())
            .filter(|partition| partition.partition >= 0)
            .map(|partition| partition.consumer_lag.max(0))
            .sum();

        let (rebalances, assigned_partitions) = statistics
            .cgrp
            .as_ref()
            .map(|group| (group.rebalance_cnt, i64::from(group.assignment_size)))
            .unwrap_or_default();

        Self {
            received_messages: statistics.rxmsgs,
            received_bytes: statistics.rxmsg_bytes,
            consumer_lag,
            rebalances,
            assigned_partitions,
            reply_queue: statistics.replyq,
        }
    }
}

/// Latest Kafka client statistics
///
/// librdkafka reports cumulative totals, so every field holds the value of
/// the most recent report.
#[derive(Debug, Default)]
pub struct KafkaClientMetrics {
    received_messages: AtomicI64,
    received_bytes: AtomicI64,
    consumer_lag: AtomicI64,
    rebalances: AtomicI64,
    assigned_partitions: AtomicI64,
    reply_queue: AtomicI64,
    reports: AtomicI64,
}

impl KafkaClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: ClientStatsSample) {
        self.received_messages
            .store(sample.received_messages, Ordering::Relaxed);
        self.received_bytes
            .store(sample.received_bytes, Ordering::Relaxed);
        self.consumer_lag.store(sample.consumer_lag, Ordering::Relaxed);
        self.rebalances.store(sample.rebalances, Ordering::Relaxed);
        self.assigned_partitions
            .store(sample.assigned_partitions, Ordering::Relaxed);
        self.reply_queue.store(sample.reply_queue, Ordering::Relaxed);
        self.reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample(&self) -> ClientStatsSample {
        ClientStatsSample {
            received_messages: self.received_messages.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            consumer_lag: self.consumer_lag.load(Ordering::Relaxed),
            rebalances: self.rebalances.load(Ordering::Relaxed),
            assigned_partitions: self.assigned_partitions.load(Ordering::Relaxed),
            reply_queue: self.reply_queue.load(Ordering::Relaxed),
        }
    }

    /// Number of statistics reports received so far
    pub fn reports(&self) -> i64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition, empty until the first report arrives
    pub fn render_prometheus(&self, namespace: &str) -> String {
        if self.reports() == 0 {
            return String::new();
        }

        let sample = self.sample();
        let families = [
            (
                "client_received_messages_total",
                "counter",
                "Messages received by the Kafka client",
                sample.received_messages,
            ),
            (
                "client_received_bytes_total",
                "counter",
                "Message bytes received by the Kafka client",
                sample.received_bytes,
            ),
            (
                "consumer_lag",
                "gauge",
                "Summed consumer lag over assigned partitions",
                sample.consumer_lag,
            ),
            (
                "rebalances_total",
                "counter",
                "Consumer group rebalances",
                sample.rebalances,
            ),
            (
                "assigned_partitions",
                "gauge",
                "Partitions currently assigned to this consumer",
                sample.assigned_partitions,
            ),
            (
                "client_reply_queue",
                "gauge",
                "Operations waiting in the client reply queue",
                sample.reply_queue,
            ),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in families {
            let _ = writeln!(out, "# HELP {namespace}_{name} {help}");
            let _ = writeln!(out, "# TYPE {namespace}_{name} {kind}");
            let _ = writeln!(out, "{namespace}_{name} {value}");
        }
        out
    }
}

/// Consumer context that feeds statistics reports into `KafkaClientMetrics`
pub struct StatsContext {
    metrics: Arc<KafkaClientMetrics>,
}

impl StatsContext {
    pub fn new(metrics: Arc<KafkaClientMetrics>) -> Self {
        Self { metrics }
    }
}

impl ClientContext for StatsContext {
    fn stats(&self, statistics: Statistics) {
        let sample = ClientStatsSample::from_statistics(&statistics);
        trace!(?sample, "Kafka client statistics");
        self.metrics.record(sample);
    }
}

impl ConsumerContext for StatsContext {}
