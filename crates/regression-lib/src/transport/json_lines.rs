//! Newline-delimited JSON transport
//!
//! Each non-blank line is one message. Offsets count non-blank lines, so a
//! restarted job can skip straight to the checkpointed position.

use super::{async_trait, BusProperties, MessageSink, MessageSource, SourceMessage};
use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Lines,
};
use tracing::info;

/// Boxed reader so stdin and files share one source type
pub type DynReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Boxed writer so stdout and files share one sink type
pub type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Reads one message per line
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    offset: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            offset: 0,
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("Failed to read from input")?
        {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for JsonLinesSource<R> {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };

        let message = SourceMessage {
            offset: self.offset,
            payload: line.into_bytes(),
        };
        self.offset += 1;
        Ok(Some(message))
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        if offset < self.offset {
            bail!(
                "Cannot rewind line source from offset {} to {}",
                self.offset,
                offset
            );
        }

        while self.offset < offset {
            if self.next_line().await?.is_none() {
                break;
            }
            self.offset += 1;
        }
        Ok(())
    }
}

/// Writes one message per line
pub struct JsonLinesSink<W: AsyncWrite> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Flush and hand back the underlying writer
    pub async fn into_inner(mut self) -> Result<W> {
        self.writer.flush().await.context("Failed to flush output")?;
        Ok(self.writer.into_inner())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for JsonLinesSink<W> {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<()> {
        self.writer
            .write_all(&payload)
            .await
            .context("Failed to write record")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("Failed to write record")?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.context("Failed to flush output")
    }
}

/// Open the input topic; `-` reads standard input
pub async fn open_input(path: &str, bus: &BusProperties) -> Result<JsonLinesSource<DynReader>> {
    let reader: DynReader = if path == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(Path::new(path))
            .await
            .with_context(|| format!("Failed to open input {:?}", path))?;
        Box::new(BufReader::new(file))
    };

    info!(
        topic = %bus.topic,
        input = %path,
        bootstrap_servers = ?bus.bootstrap_servers,
        group_id = ?bus.group_id,
        "Subscribed to input topic"
    );
    Ok(JsonLinesSource::new(reader))
}

/// Open the output topic; `-` writes standard output
///
/// Files are appended to, so records re-published after a restart follow
/// the ones already written.
pub async fn open_output(path: &str, bus: &BusProperties) -> Result<JsonLinesSink<DynWriter>> {
    let writer: DynWriter = if path == "-" {
        Box::new(tokio::io::stdout())
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(path))
            .await
            .with_context(|| format!("Failed to open output {:?}", path))?;
        Box::new(file)
    };

    info!(topic = %bus.output_topic, output = %path, "Publishing to output topic");
    Ok(JsonLinesSink::new(writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_source_numbers_non_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n{\"a\":2}\n   \n{\"a\":3}\n";
        let mut source = JsonLinesSource::new(input);

        let mut offsets = Vec::new();
        while let Some(message) = source.next_message().await.unwrap() {
            offsets.push(message.offset);
        }
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_source_seek_skips_messages() {
        let input: &[u8] = b"one\ntwo\n\nthree\nfour\n";
        let mut source = JsonLinesSource::new(input);

        source.seek(2).await.unwrap();
        let message = source.next_message().await.unwrap().unwrap();
        assert_eq!(message.offset, 2);
        assert_eq!(message.payload, b"three");

        assert!(source.seek(1).await.is_err());
    }

    #[tokio::test]
    async fn test_source_seek_past_end() {
        let input: &[u8] = b"one\n";
        let mut source = JsonLinesSource::new(input);

        source.seek(10).await.unwrap();
        assert!(source.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sink_writes_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(b"{\"x\":1}".to_vec()).await.unwrap();
        sink.publish(b"{\"x\":2}".to_vec()).await.unwrap();

        let written = sink.into_inner().await.unwrap();
        assert_eq!(written, b"{\"x\":1}\n{\"x\":2}\n");
    }

    #[tokio::test]
    async fn test_open_output_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.jsonl");
        let path_str = path.to_str().unwrap();
        let bus = BusProperties::default();

        for payload in [b"first".to_vec(), b"second".to_vec()] {
            let mut sink = open_output(path_str, &bus).await.unwrap();
            sink.publish(payload).await.unwrap();
            sink.flush().await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_open_input_missing_file() {
        let bus = BusProperties::default();
        assert!(open_input("/nonexistent/input.jsonl", &bus).await.is_err());
    }
}
