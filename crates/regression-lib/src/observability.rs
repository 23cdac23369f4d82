//! Observability infrastructure for the regression job
//!
//! Provides:
//! - Prometheus metrics (throughput, drops, checkpoint latency, watermark)
//! - Structured JSON logging with tracing

use crate::models::ContainerKey;
use crate::transport::BusProperties;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for checkpoint duration (in seconds)
const CHECKPOINT_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct PipelineMetricsInner {
    messages_received: IntCounter,
    samples_dropped: IntCounterVec,
    updates_emitted: IntCounter,
    updates_suppressed: IntCounter,
    records_forwarded: IntCounter,
    records_published: IntCounter,
    encode_errors: IntCounter,
    keys_tracked: IntGauge,
    watermark_seconds: IntGauge,
    checkpoints_completed: IntCounter,
    checkpoint_duration_seconds: Histogram,
    checkpoint_offset: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            messages_received: register_int_counter!(
                "regression_job_messages_received_total",
                "Messages read from the input topic"
            )
            .expect("Failed to register messages_received"),

            samples_dropped: register_int_counter_vec!(
                "regression_job_samples_dropped_total",
                "Input messages dropped before reaching a model",
                &["reason"]
            )
            .expect("Failed to register samples_dropped"),

            updates_emitted: register_int_counter!(
                "regression_job_updates_emitted_total",
                "Model updates emitted by the refine stage"
            )
            .expect("Failed to register updates_emitted"),

            updates_suppressed: register_int_counter!(
                "regression_job_updates_suppressed_total",
                "Samples absorbed while the key's fit was still undefined"
            )
            .expect("Failed to register updates_suppressed"),

            records_forwarded: register_int_counter!(
                "regression_job_records_forwarded_total",
                "Freshest models forwarded by the count window reducer"
            )
            .expect("Failed to register records_forwarded"),

            records_published: register_int_counter!(
                "regression_job_records_published_total",
                "Records written to the output topic"
            )
            .expect("Failed to register records_published"),

            encode_errors: register_int_counter!(
                "regression_job_encode_errors_total",
                "Records dropped because they could not be encoded"
            )
            .expect("Failed to register encode_errors"),

            keys_tracked: register_int_gauge!(
                "regression_job_keys_tracked",
                "Container keys with a regression model"
            )
            .expect("Failed to register keys_tracked"),

            watermark_seconds: register_int_gauge!(
                "regression_job_watermark_seconds",
                "Current event-time watermark in Unix seconds"
            )
            .expect("Failed to register watermark_seconds"),

            checkpoints_completed: register_int_counter!(
                "regression_job_checkpoints_completed_total",
                "Checkpoints durably written"
            )
            .expect("Failed to register checkpoints_completed"),

            checkpoint_duration_seconds: register_histogram!(
                "regression_job_checkpoint_duration_seconds",
                "Time from barrier injection to checkpoint write",
                CHECKPOINT_BUCKETS.to_vec()
            )
            .expect("Failed to register checkpoint_duration_seconds"),

            checkpoint_offset: register_int_gauge!(
                "regression_job_checkpoint_source_offset",
                "Source offset recorded by the latest checkpoint"
            )
            .expect("Failed to register checkpoint_offset"),
        }
    }
}

/// Job metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_messages_received(&self) {
        self.inner().messages_received.inc();
    }

    /// Count a dropped input message under `reason`
    pub fn inc_samples_dropped(&self, reason: &str) {
        self.inner()
            .samples_dropped
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_updates_emitted(&self) {
        self.inner().updates_emitted.inc();
    }

    pub fn inc_updates_suppressed(&self) {
        self.inner().updates_suppressed.inc();
    }

    pub fn inc_records_forwarded(&self) {
        self.inner().records_forwarded.inc();
    }

    pub fn inc_records_published(&self) {
        self.inner().records_published.inc();
    }

    pub fn inc_encode_errors(&self) {
        self.inner().encode_errors.inc();
    }

    pub fn set_keys_tracked(&self, count: i64) {
        self.inner().keys_tracked.set(count);
    }

    pub fn set_watermark(&self, event_time: i64) {
        self.inner().watermark_seconds.set(event_time);
    }

    /// Current number of keys with a model
    pub fn keys_tracked(&self) -> i64 {
        self.inner().keys_tracked.get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Record a completed checkpoint
    pub fn observe_checkpoint(&self, duration_secs: f64, source_offset: u64) {
        self.inner().checkpoints_completed.inc();
        self.inner()
            .checkpoint_duration_seconds
            .observe(duration_secs);
        self.inner().checkpoint_offset.set(source_offset as i64);
    }
}

/// Structured logger for job events
///
/// Provides consistent JSON-formatted logging for checkpoints, drops and
/// lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    job_name: String,
}

impl StructuredLogger {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
        }
    }

    /// Log job startup
    pub fn log_startup(&self, version: &str, bus: &BusProperties, partitions: usize) {
        info!(
            event = "job_started",
            job = %self.job_name,
            version = %version,
            topic = %bus.topic,
            output_topic = %bus.output_topic,
            bootstrap_servers = ?bus.bootstrap_servers,
            group_id = ?bus.group_id,
            zookeeper_connect = ?bus.zookeeper_connect,
            partitions = partitions,
            "Regression job started"
        );
    }

    /// Log job shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "job_shutdown",
            job = %self.job_name,
            reason = %reason,
            "Regression job shutting down"
        );
    }

    /// Log a dropped input message
    pub fn log_sample_dropped(&self, offset: u64, reason: &str, error: &dyn std::fmt::Display) {
        debug!(
            event = "sample_dropped",
            job = %self.job_name,
            offset = offset,
            reason = %reason,
            error = %error,
            "Dropped input message"
        );
    }

    /// Log a record that could not be encoded for the output topic
    pub fn log_encode_failure(&self, key: &ContainerKey, x: i64, error: &dyn std::fmt::Display) {
        warn!(
            event = "encode_failed",
            job = %self.job_name,
            key = %key,
            x = x,
            error = %error,
            "Dropped record that could not be encoded"
        );
    }

    /// Log a completed checkpoint
    pub fn log_checkpoint(&self, id: u64, source_offset: u64, keys: usize, duration_ms: u128) {
        info!(
            event = "checkpoint_completed",
            job = %self.job_name,
            checkpoint_id = id,
            source_offset = source_offset,
            keys = keys,
            duration_ms = duration_ms,
            "Checkpoint completed"
        );
    }

    /// Log state restored from a checkpoint
    pub fn log_restore(&self, id: u64, source_offset: u64, keys: usize, open_windows: usize) {
        info!(
            event = "state_restored",
            job = %self.job_name,
            checkpoint_id = id,
            source_offset = source_offset,
            keys = keys,
            open_windows = open_windows,
            "Restored state from checkpoint"
        );
    }
}
