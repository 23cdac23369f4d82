//! Keyed state for the regression job
//!
//! Every container key owns exactly one [`Accumulator`]. Stores are scoped to a
//! single partition, so a key is only ever touched by the task that owns it.
//! Durability comes from periodic checkpoints of the whole store.

mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

use crate::error::StateError;
use crate::models::ContainerKey;
use crate::regression::Accumulator;
use dashmap::DashMap;

/// Storage backend for per-key accumulators
pub trait KeyedStateStore: Send + Sync {
    /// Accumulator for `key`, inserting a zeroed one on first access
    fn get_or_create(&self, key: &ContainerKey) -> Accumulator;

    /// Replace the accumulator stored for `key`
    fn put(&self, key: &ContainerKey, accumulator: Accumulator) -> Result<(), StateError>;

    /// Copy of every entry, sorted by key
    fn snapshot(&self) -> Vec<(ContainerKey, Accumulator)>;

    /// Replace the whole contents with a previous snapshot
    fn restore(&self, entries: Vec<(ContainerKey, Accumulator)>);

    /// Number of keys tracked
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory state store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    accumulators: DashMap<ContainerKey, Accumulator>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an accumulator without creating it
    pub fn get(&self, key: &ContainerKey) -> Option<Accumulator> {
        self.accumulators.get(key).map(|r| r.value().clone())
    }
}

impl KeyedStateStore for InMemoryStateStore {
    fn get_or_create(&self, key: &ContainerKey) -> Accumulator {
        self.accumulators.entry(key.clone()).or_default().clone()
    }

    fn put(&self, key: &ContainerKey, accumulator: Accumulator) -> Result<(), StateError> {
        self.accumulators.insert(key.clone(), accumulator);
        Ok(())
    }

    fn snapshot(&self) -> Vec<(ContainerKey, Accumulator)> {
        let mut entries: Vec<_> = self
            .accumulators
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn restore(&self, entries: Vec<(ContainerKey, Accumulator)>) {
        self.accumulators.clear();
        for (key, accumulator) in entries {
            self.accumulators.insert(key, accumulator);
        }
    }

    fn len(&self) -> usize {
        self.accumulators.len()
    }
}
