//! Job runner
//!
//! Wires source, partition workers and sink together:
//! - decodes input messages and routes samples to the partition owning their key
//! - injects checkpoint barriers so every partition snapshots at the same offset
//! - flushes the sink before a checkpoint is committed
//! - restores the latest checkpoint and resumes the source from its offset

use super::partition::{
    partition_for, split_checkpoint, PartitionSnapshot, PartitionStats, PartitionWorker,
};
use super::reducer::DEFAULT_WINDOW_SIZE;
use super::watermark::WatermarkTracker;
use crate::codec::{decode_sample, encode_update, UsageMetric};
use crate::health::{components, CheckpointProgress, HealthRegistry};
use crate::models::{UpdateRecord, UsageSample};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::state::{Checkpoint, CheckpointStore, InMemoryStateStore};
use crate::transport::{MessageSink, MessageSource};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Configuration for the job runner
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of partition workers
    pub partitions: usize,
    /// Records per tumbling count window
    pub window_size: usize,
    /// Statistic regressed against time
    pub metric: UsageMetric,
    /// Interval between checkpoints; `None` disables checkpointing
    pub checkpoint_interval: Option<Duration>,
    /// Interval between watermark publications
    pub watermark_interval: Duration,
    /// How far the watermark trails the newest event time
    pub allowed_lateness: Duration,
    /// Channel buffer size per partition and for the sink
    pub channel_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            window_size: DEFAULT_WINDOW_SIZE,
            metric: UsageMetric::Memory,
            checkpoint_interval: Some(Duration::from_secs(5)),
            watermark_interval: Duration::from_secs(1),
            allowed_lateness: Duration::ZERO,
            channel_buffer_size: 1000,
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub messages_read: u64,
    pub samples_dropped: u64,
    pub updates_emitted: u64,
    pub updates_suppressed: u64,
    pub records_forwarded: u64,
    pub records_published: u64,
    pub checkpoints_completed: u64,
    /// Source offset the run stopped at
    pub final_offset: u64,
    pub stop_reason: String,
}

enum PartitionMessage {
    Sample(UsageSample),
    Barrier(oneshot::Sender<PartitionSnapshot>),
}

enum SinkMessage {
    Record(UpdateRecord),
    Flush(oneshot::Sender<Result<()>>),
}

/// The regression job
pub struct Pipeline {
    config: PipelineConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            checkpoints,
            metrics,
            logger,
            health: None,
        }
    }

    /// Report component failures to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run until the source is exhausted or `shutdown` fires
    ///
    /// Any state, checkpoint, source or sink failure aborts the run with an
    /// error. The source's `next_message` must be cancel safe. Dropping every
    /// `shutdown` sender counts as a shutdown signal.
    pub async fn run<Src, Snk>(
        &self,
        mut source: Src,
        sink: Snk,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<PipelineReport>
    where
        Src: MessageSource,
        Snk: MessageSink + 'static,
    {
        let partitions = self.config.partitions.max(1);
        let buffer = self.config.channel_buffer_size.max(1);

        let restored = self
            .checkpoints
            .load_latest()
            .context("Failed to load latest checkpoint")?;
        let (mut next_checkpoint_id, start_offset, snapshots) = match restored {
            Some(checkpoint) => {
                self.logger.log_restore(
                    checkpoint.id,
                    checkpoint.source_offset,
                    checkpoint.accumulators.len(),
                    checkpoint.windows.len(),
                );
                self.metrics
                    .set_keys_tracked(checkpoint.accumulators.len() as i64);
                self.record_progress(progress_of(&checkpoint)).await;
                (
                    checkpoint.id + 1,
                    checkpoint.source_offset,
                    split_checkpoint(checkpoint, partitions),
                )
            }
            None => (1, 0, vec![PartitionSnapshot::default(); partitions]),
        };

        if start_offset > 0 {
            if let Err(e) = source.seek(start_offset).await {
                self.mark_unhealthy(components::SOURCE, &e).await;
                return Err(e.context(format!("Failed to seek source to offset {}", start_offset)));
            }
        }

        let (sink_tx, sink_rx) = mpsc::channel(buffer);
        let sink_handle = tokio::spawn(run_sink(
            sink,
            sink_rx,
            self.metrics.clone(),
            self.logger.clone(),
        ));

        let mut partition_txs = Vec::with_capacity(partitions);
        let mut partition_handles = Vec::with_capacity(partitions);
        for (id, snapshot) in snapshots.into_iter().enumerate() {
            let mut worker = PartitionWorker::new(
                id,
                InMemoryStateStore::new(),
                self.config.window_size,
                self.metrics.clone(),
            );
            worker.restore(snapshot);

            let (tx, rx) = mpsc::channel(buffer);
            partition_txs.push(tx);
            partition_handles.push(tokio::spawn(run_partition(worker, rx, sink_tx.clone())));
        }

        info!(
            partitions = partitions,
            start_offset = start_offset,
            metric = %self.config.metric,
            "Pipeline running"
        );

        let mut checkpoint_ticker = self.config.checkpoint_interval.map(ticker);
        let mut watermark_ticker = ticker(self.config.watermark_interval);
        let mut watermark = WatermarkTracker::new(self.config.allowed_lateness);

        let mut report = PipelineReport {
            final_offset: start_offset,
            ..Default::default()
        };

        let stop_reason = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break "shutdown signal",

                _ = maybe_tick(&mut checkpoint_ticker) => {
                    self.checkpoint(
                        &partition_txs,
                        &sink_tx,
                        next_checkpoint_id,
                        report.final_offset,
                    )
                    .await?;
                    next_checkpoint_id += 1;
                    report.checkpoints_completed += 1;
                }

                _ = watermark_ticker.tick() => {
                    if let Some(current) = watermark.current() {
                        self.metrics.set_watermark(current);
                    }
                }

                message = source.next_message() => {
                    let message = match message {
                        Ok(Some(message)) => message,
                        Ok(None) => break "source exhausted",
                        Err(e) => {
                            self.mark_unhealthy(components::SOURCE, &e).await;
                            return Err(e.context("Failed to read from source"));
                        }
                    };

                    report.messages_read += 1;
                    report.final_offset = message.offset + 1;
                    self.metrics.inc_messages_received();

                    let sample = match decode_sample(&message.payload, self.config.metric) {
                        Ok(sample) => sample,
                        Err(e) => {
                            report.samples_dropped += 1;
                            self.metrics.inc_samples_dropped(e.reason());
                            self.logger.log_sample_dropped(message.offset, e.reason(), &e);
                            continue;
                        }
                    };

                    watermark.observe(sample.event_time);
                    let p = partition_for(&sample.key(), partitions);
                    if partition_txs[p].send(PartitionMessage::Sample(sample)).await.is_err() {
                        let e = partition_failure(&mut partition_handles[p], p).await;
                        self.mark_unhealthy(components::PARTITIONS, &e).await;
                        return Err(e);
                    }
                }
            }
        };

        self.logger.log_shutdown(stop_reason);
        report.stop_reason = stop_reason.to_string();

        if checkpoint_ticker.is_some() {
            self.checkpoint(
                &partition_txs,
                &sink_tx,
                next_checkpoint_id,
                report.final_offset,
            )
            .await?;
            report.checkpoints_completed += 1;
        }

        // Closing the channels lets every task drain and exit
        drop(partition_txs);
        drop(sink_tx);

        for (p, handle) in partition_handles.into_iter().enumerate() {
            let stats = match handle.await {
                Ok(Ok(stats)) => stats,
                Ok(Err(e)) => {
                    self.mark_unhealthy(components::PARTITIONS, &e).await;
                    return Err(e);
                }
                Err(e) => return Err(anyhow!("Partition {} task panicked: {}", p, e)),
            };
            report.updates_emitted += stats.updates_emitted;
            report.updates_suppressed += stats.updates_suppressed;
            report.records_forwarded += stats.records_forwarded;
        }

        report.records_published = match sink_handle.await {
            Ok(Ok(published)) => published,
            Ok(Err(e)) => {
                self.mark_unhealthy(components::SINK, &e).await;
                return Err(e);
            }
            Err(e) => return Err(anyhow!("Sink task panicked: {}", e)),
        };

        info!(
            messages_read = report.messages_read,
            samples_dropped = report.samples_dropped,
            records_published = report.records_published,
            final_offset = report.final_offset,
            "Pipeline stopped"
        );
        Ok(report)
    }

    /// Align all partitions on a barrier and persist their combined state
    async fn checkpoint(
        &self,
        partitions: &[mpsc::Sender<PartitionMessage>],
        sink: &mpsc::Sender<SinkMessage>,
        id: u64,
        source_offset: u64,
    ) -> Result<()> {
        let result = self
            .write_checkpoint(partitions, sink, id, source_offset)
            .await;
        if let Err(e) = &result {
            error!(checkpoint_id = id, error = %e, "Checkpoint failed");
            self.mark_unhealthy(components::CHECKPOINTER, e).await;
        }
        result
    }

    async fn write_checkpoint(
        &self,
        partitions: &[mpsc::Sender<PartitionMessage>],
        sink: &mpsc::Sender<SinkMessage>,
        id: u64,
        source_offset: u64,
    ) -> Result<()> {
        let start = Instant::now();

        let mut acks = Vec::with_capacity(partitions.len());
        for (p, tx) in partitions.iter().enumerate() {
            let (ack_tx, ack_rx) = oneshot::channel();
            tx.send(PartitionMessage::Barrier(ack_tx))
                .await
                .map_err(|_| anyhow!("Partition {} stopped before checkpoint {}", p, id))?;
            acks.push(ack_rx);
        }

        let mut checkpoint = Checkpoint {
            id,
            source_offset,
            created_at: chrono::Utc::now().timestamp(),
            accumulators: Vec::new(),
            windows: Vec::new(),
        };
        for (p, ack) in acks.into_iter().enumerate() {
            let snapshot = ack
                .await
                .map_err(|_| anyhow!("Partition {} dropped checkpoint barrier {}", p, id))?;
            checkpoint.accumulators.extend(snapshot.accumulators);
            checkpoint.windows.extend(snapshot.windows);
        }
        checkpoint.accumulators.sort_by(|a, b| a.0.cmp(&b.0));
        checkpoint.windows.sort_by(|a, b| a.0.cmp(&b.0));

        // Everything emitted before the barrier must be out before the offset moves on
        let (flush_tx, flush_rx) = oneshot::channel();
        sink.send(SinkMessage::Flush(flush_tx))
            .await
            .map_err(|_| anyhow!("Sink stopped before checkpoint {}", id))?;
        flush_rx
            .await
            .map_err(|_| anyhow!("Sink dropped flush request for checkpoint {}", id))?
            .context("Failed to flush sink before checkpoint")?;

        let keys = checkpoint.accumulators.len();
        let progress = progress_of(&checkpoint);
        let store = Arc::clone(&self.checkpoints);
        tokio::task::spawn_blocking(move || store.save(&checkpoint))
            .await
            .context("Checkpoint writer panicked")?
            .with_context(|| format!("Failed to write checkpoint {}", id))?;

        let elapsed = start.elapsed();
        self.metrics
            .observe_checkpoint(elapsed.as_secs_f64(), source_offset);
        self.metrics.set_keys_tracked(keys as i64);
        self.logger
            .log_checkpoint(id, source_offset, keys, elapsed.as_millis());
        self.record_progress(progress).await;
        Ok(())
    }

    async fn record_progress(&self, progress: CheckpointProgress) {
        if let Some(health) = &self.health {
            health.record_checkpoint(progress).await;
        }
    }

    async fn mark_unhealthy(&self, component: &str, error: &anyhow::Error) {
        if let Some(health) = &self.health {
            health.set_unhealthy(component, format!("{:#}", error)).await;
        }
    }
}

fn progress_of(checkpoint: &Checkpoint) -> CheckpointProgress {
    CheckpointProgress {
        checkpoint_id: checkpoint.id,
        source_offset: checkpoint.source_offset,
        keys_tracked: checkpoint.accumulators.len(),
        created_at: checkpoint.created_at,
    }
}

/// Interval whose first tick is one period from now
fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Tick an optional interval; never completes when it is `None`
async fn maybe_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Error explaining why a partition stopped accepting samples
async fn partition_failure(
    handle: &mut JoinHandle<Result<PartitionStats>>,
    partition: usize,
) -> anyhow::Error {
    match handle.await {
        Ok(Err(e)) => e,
        Ok(Ok(_)) => anyhow!("Partition {} stopped unexpectedly", partition),
        Err(e) => anyhow!("Partition {} task panicked: {}", partition, e),
    }
}

async fn run_partition(
    mut worker: PartitionWorker,
    mut rx: mpsc::Receiver<PartitionMessage>,
    sink: mpsc::Sender<SinkMessage>,
) -> Result<PartitionStats> {
    while let Some(message) = rx.recv().await {
        match message {
            PartitionMessage::Sample(sample) => {
                let forwarded = worker
                    .handle_sample(&sample)
                    .with_context(|| format!("Partition {} failed to update state", worker.id()))?;

                if let Some(record) = forwarded {
                    sink.send(SinkMessage::Record(record))
                        .await
                        .map_err(|_| anyhow!("Sink stopped"))?;
                }
            }
            PartitionMessage::Barrier(ack) => {
                // The coordinator only goes away on failure
                let _ = ack.send(worker.snapshot());
            }
        }
    }

    debug!(
        partition = worker.id(),
        keys = worker.keys_tracked(),
        "Partition drained"
    );
    Ok(worker.stats())
}

async fn run_sink<S: MessageSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<SinkMessage>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
) -> Result<u64> {
    let mut published = 0u64;

    while let Some(message) = rx.recv().await {
        match message {
            SinkMessage::Record(record) => match encode_update(&record) {
                Ok(payload) => {
                    sink.publish(payload).await?;
                    published += 1;
                    metrics.inc_records_published();
                }
                Err(e) => {
                    metrics.inc_encode_errors();
                    logger.log_encode_failure(&record.key(), record.x, &e);
                }
            },
            SinkMessage::Flush(ack) => {
                if let Err(e) = sink.flush().await {
                    let _ = ack.send(Err(anyhow!("{:#}", e)));
                    return Err(e);
                }
                let _ = ack.send(Ok(()));
            }
        }
    }

    sink.flush().await?;
    Ok(published)
}
