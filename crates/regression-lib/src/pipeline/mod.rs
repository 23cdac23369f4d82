//! Streaming regression pipeline
//!
//! Samples are routed by key to partition workers. Each worker refines the
//! key's model, emits an update per sample and reduces updates in tumbling
//! count windows; the freshest record of every window is published.

mod partition;
mod reducer;
mod refine;
mod runner;
mod watermark;


pub use partition::{
    partition_for, split_checkpoint, PartitionSnapshot, PartitionStats, PartitionWorker,
};
pub use reducer::{FreshestReducer, DEFAULT_WINDOW_SIZE};
pub use refine::RefineStage;
pub use runner::{Pipeline, PipelineConfig, PipelineReport};
pub use watermark::WatermarkTracker;
