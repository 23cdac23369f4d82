//! In-process channel transport

use super::{async_trait, MessageSink, MessageSource, SourceMessage};
use anyhow::Result;
use tokio::sync::mpsc;

/// Source fed by a tokio channel; ends when every sender is dropped
pub struct ChannelSource {
    receiver: mpsc::Receiver<Vec<u8>>,
    offset: u64,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it
    pub fn new(buffer_size: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (sender, Self::from_receiver(receiver))
    }

    pub fn from_receiver(receiver: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            receiver,
            offset: 0,
        }
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        let Some(payload) = self.receiver.recv().await else {
            return Ok(None);
        };

        let message = SourceMessage {
            offset: self.offset,
            payload,
        };
        self.offset += 1;
        Ok(Some(message))
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        if offset < self.offset {
            anyhow::bail!("Cannot rewind channel source to offset {}", offset);
        }

        while self.offset < offset {
            if self.receiver.recv().await.is_none() {
                break;
            }
            self.offset += 1;
        }
        Ok(())
    }
}

/// Sink that forwards every payload into a tokio channel
pub struct ChannelSink {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sender
            .send(payload)
            .await
            .map_err(|_| anyhow::anyhow!("Output channel closed"))
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
