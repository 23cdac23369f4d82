//! Message bus transport
//!
//! The pipeline reads raw payloads from a [`MessageSource`] and publishes
//! encoded records to a [`MessageSink`]. Two transports are provided:
//! - newline-delimited JSON over any tokio reader/writer (files, stdio)
//! - in-process tokio channels for embedding and tests

mod channel;
mod json_lines;

pub use channel::{ChannelSink, ChannelSource};
pub use json_lines::{open_input, open_output, DynReader, DynWriter, JsonLinesSink, JsonLinesSource};

pub use async_trait::async_trait;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One raw message read from the input topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    /// Zero-based position of this message in the topic
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Input side of the bus
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` once the source is exhausted
    ///
    /// Must be cancel safe: the runner polls it inside `select!`, and a
    /// dropped call must not lose a message.
    async fn next_message(&mut self) -> Result<Option<SourceMessage>>;

    /// Position the source so the next message returned has `offset`
    async fn seek(&mut self, offset: u64) -> Result<()>;
}

/// Output side of the bus
#[async_trait]
pub trait MessageSink: Send {
    /// Publish one encoded record
    async fn publish(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Make everything published so far durable
    async fn flush(&mut self) -> Result<()>;
}

/// Connection properties handed to the transport unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusProperties {
    /// Input topic name
    pub topic: String,
    /// Output topic name
    pub output_topic: String,
    pub bootstrap_servers: Option<String>,
    pub group_id: Option<String>,
    pub zookeeper_connect: Option<String>,
}
