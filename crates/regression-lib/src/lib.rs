//! Per-container online regression over a usage sample stream
//!
//! This crate provides the core functionality for:
//! - Decoding usage samples and encoding model updates
//! - Incremental least-squares models keyed by machine and container
//! - Freshest-of-N count window reduction
//! - Checkpointed, partitioned pipeline execution
//! - Health checks and observability

pub mod api;
pub mod codec;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod regression;
pub mod state;
pub mod transport;

pub use codec::UsageMetric;
pub use error::{CodecError, StateError};
pub use health::{
    CheckpointProgress, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
