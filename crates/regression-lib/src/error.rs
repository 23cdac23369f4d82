//! Error types shared across the library seams

use std::path::PathBuf;
use thiserror::Error;

/// Failures decoding an input sample or encoding an output record
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid sample payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("Unparseable timestamp: {value}")]
    MalformedTimestamp { value: String },

    #[error("Timestamp before the Unix epoch: {value}")]
    NegativeTimestamp { value: String },

    #[error("Sample has no value for metric {metric}")]
    MissingMetric { metric: &'static str },

    #[error("Failed to encode update record: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Short label used as the drop reason in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            CodecError::InvalidPayload(_) => "payload",
            CodecError::MalformedTimestamp { .. } | CodecError::NegativeTimestamp { .. } => {
                "timestamp"
            }
            CodecError::MissingMetric { .. } => "metric",
            CodecError::Encode(_) => "encode",
        }
    }
}

/// Failures persisting or restoring keyed state
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Checkpoint I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
