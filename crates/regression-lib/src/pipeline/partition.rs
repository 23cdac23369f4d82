//! Key partitioning and the per-partition worker
//!
//! Every key hashes to exactly one partition, and each partition owns its
//! own state store and count windows, so a key's accumulator only ever has
//! a single writer.

use super::reducer::FreshestReducer;
use super::refine::RefineStage;
use crate::error::StateError;
use crate::models::{ContainerKey, UpdateRecord, UsageSample};
use crate::observability::PipelineMetrics;
use crate::regression::Accumulator;
use crate::state::{Checkpoint, InMemoryStateStore, KeyedStateStore};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Partition that owns `key` among `partitions`
pub fn partition_for(key: &ContainerKey, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

/// State owned by one partition at a checkpoint barrier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionSnapshot {
    pub accumulators: Vec<(ContainerKey, Accumulator)>,
    pub windows: Vec<(ContainerKey, Vec<UpdateRecord>)>,
}

/// Split a checkpoint into per-partition snapshots
///
/// The partition count may differ from the run that wrote the checkpoint;
/// entries are re-routed by key.
pub fn split_checkpoint(checkpoint: Checkpoint, partitions: usize) -> Vec<PartitionSnapshot> {
    let mut snapshots = vec![PartitionSnapshot::default(); partitions.max(1)];

    for (key, accumulator) in checkpoint.accumulators {
        let p = partition_for(&key, partitions);
        snapshots[p].accumulators.push((key, accumulator));
    }
    for (key, records) in checkpoint.windows {
        let p = partition_for(&key, partitions);
        snapshots[p].windows.push((key, records));
    }

    snapshots
}

/// Counters for one partition's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub samples_processed: u64,
    pub updates_emitted: u64,
    pub updates_suppressed: u64,
    pub records_forwarded: u64,
}

/// Refine stage and reducer for the keys of one partition
pub struct PartitionWorker<S = InMemoryStateStore> {
    id: usize,
    refine: RefineStage<S>,
    reducer: FreshestReducer,
    metrics: PipelineMetrics,
    stats: PartitionStats,
}

impl<S: KeyedStateStore> PartitionWorker<S> {
    pub fn new(id: usize, store: S, window_size: usize, metrics: PipelineMetrics) -> Self {
        Self {
            id,
            refine: RefineStage::new(store),
            reducer: FreshestReducer::new(window_size),
            metrics,
            stats: PartitionStats::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stats(&self) -> PartitionStats {
        self.stats
    }

    /// Number of keys with a model in this partition
    pub fn keys_tracked(&self) -> usize {
        self.refine.store().len()
    }

    /// Run one sample through refine and reduce
    ///
    /// Returns the record the reducer forwards downstream, if this sample
    /// closed a window.
    pub fn handle_sample(
        &mut self,
        sample: &UsageSample,
    ) -> Result<Option<UpdateRecord>, StateError> {
        self.stats.samples_processed += 1;

        let Some(update) = self.refine.process(sample)? else {
            self.stats.updates_suppressed += 1;
            self.metrics.inc_updates_suppressed();
            return Ok(None);
        };
        self.stats.updates_emitted += 1;
        self.metrics.inc_updates_emitted();

        let forwarded = self.reducer.push(update);
        if forwarded.is_some() {
            self.stats.records_forwarded += 1;
            self.metrics.inc_records_forwarded();
        }
        Ok(forwarded)
    }

    /// Copy of this partition's state
    pub fn snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            accumulators: self.refine.store().snapshot(),
            windows: self.reducer.snapshot(),
        }
    }

    /// Replace this partition's state with a snapshot
    pub fn restore(&mut self, snapshot: PartitionSnapshot) {
        self.refine.store().restore(snapshot.accumulators);
        self.reducer.restore(snapshot.windows);
    }
}
