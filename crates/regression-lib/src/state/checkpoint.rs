//! Durable checkpoints of keyed state
//!
//! A checkpoint captures every partition's accumulators and open count
//! windows together with the source offset they correspond to. Restoring it
//! and replaying the source from that offset reproduces the uninterrupted run.

use crate::error::StateError;
use crate::models::{ContainerKey, UpdateRecord};
use crate::regression::Accumulator;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// File name of the latest checkpoint inside the checkpoint directory
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Consistent snapshot of the whole job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Monotonically increasing checkpoint number
    pub id: u64,
    /// Number of source messages fully reflected in this state
    pub source_offset: u64,
    /// Unix seconds when the checkpoint completed
    pub created_at: i64,
    pub accumulators: Vec<(ContainerKey, Accumulator)>,
    /// Records buffered in open count windows
    pub windows: Vec<(ContainerKey, Vec<UpdateRecord>)>,
}

/// Durable storage for checkpoints
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint`, replacing the previous one once complete
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError>;

    /// Most recent completed checkpoint, if any
    fn load_latest(&self) -> Result<Option<Checkpoint>, StateError>;
}

/// Checkpoints stored as a JSON file in a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the latest checkpoint file
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn io_error(path: &Path, source: std::io::Error) -> StateError {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let json = serde_json::to_vec(checkpoint)?;

        // Write atomically using temp file
        let path = self.path();
        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Self::io_error(&temp_path, e))?;

        file.write_all(&json)
            .map_err(|e| Self::io_error(&temp_path, e))?;
        file.sync_all().map_err(|e| Self::io_error(&temp_path, e))?;

        std::fs::rename(&temp_path, &path).map_err(|e| Self::io_error(&path, e))?;

        debug!(
            path = %path.display(),
            checkpoint_id = checkpoint.id,
            keys = checkpoint.accumulators.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<Checkpoint>, StateError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path).map_err(|e| Self::io_error(&path, e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Self::io_error(&path, e))?;

        let checkpoint: Checkpoint = serde_json::from_slice(&data)?;
        info!(
            path = %path.display(),
            checkpoint_id = checkpoint.id,
            source_offset = checkpoint.source_offset,
            "Loaded checkpoint from disk"
        );
        Ok(Some(checkpoint))
    }
}

/// Checkpoints held in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    latest: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing checkpoint
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            latest: Mutex::new(Some(checkpoint)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Checkpoint>>, StateError> {
        self.latest.lock().map_err(|_| StateError::Unavailable {
            reason: "checkpoint store lock poisoned".to_string(),
        })
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        *self.lock()? = Some(checkpoint.clone());
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<Checkpoint>, StateError> {
        Ok(self.lock()?.clone())
    }
}
