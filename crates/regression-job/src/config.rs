//! Job configuration
//!
//! Values come from an optional config file, then `JOB_*` environment
//! variables, then command-line flags; later sources win.

use anyhow::{bail, Context, Result};
use clap::Parser;
use regression_lib::codec::UsageMetric;
use regression_lib::pipeline::{PipelineConfig, DEFAULT_WINDOW_SIZE};
use regression_lib::transport::BusProperties;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line flags
#[derive(Parser, Debug, Default)]
#[command(name = "regression-job")]
#[command(
    author,
    version,
    about = "Per-container online regression over a usage sample stream",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "JOB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input topic to consume usage samples from
    #[arg(long)]
    pub topic: Option<String>,

    /// Output topic for forwarded model updates
    #[arg(long)]
    pub output_topic: Option<String>,

    /// Message bus bootstrap servers
    #[arg(long = "bootstrap.servers")]
    pub bootstrap_servers: Option<String>,

    /// Consumer group id
    #[arg(long = "group.id")]
    pub group_id: Option<String>,

    /// Coordination service address
    #[arg(long = "zookeeper.connect")]
    pub zookeeper_connect: Option<String>,

    /// Number of partition workers
    #[arg(long)]
    pub partitions: Option<usize>,

    /// Updates per tumbling count window
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Usage statistic regressed against time
    #[arg(long)]
    pub metric: Option<UsageMetric>,

    /// Watermark publication interval in milliseconds
    #[arg(long)]
    pub watermark_interval_ms: Option<u64>,

    /// Checkpoint interval in milliseconds; 0 disables checkpointing
    #[arg(long)]
    pub checkpoint_interval_ms: Option<u64>,

    /// How far the watermark trails the newest event time
    #[arg(long)]
    pub allowed_lateness_secs: Option<u64>,

    /// Directory holding the latest checkpoint
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Input path, `-` for standard input
    #[arg(long)]
    pub input: Option<String>,

    /// Output path, `-` for standard output
    #[arg(long)]
    pub output: Option<String>,

    /// API server port for health/metrics
    #[arg(long)]
    pub api_port: Option<u16>,
}

/// Resolved job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub topic: String,

    #[serde(default = "default_output_topic")]
    pub output_topic: String,

    #[serde(default)]
    pub bootstrap_servers: Option<String>,

    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(default)]
    pub zookeeper_connect: Option<String>,

    #[serde(default = "default_partitions")]
    pub partitions: usize,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default)]
    pub metric: UsageMetric,

    #[serde(default = "default_watermark_interval")]
    pub watermark_interval_ms: u64,

    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_ms: u64,

    #[serde(default)]
    pub allowed_lateness_secs: u64,

    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    #[serde(default = "default_stdio")]
    pub input: String,

    #[serde(default = "default_stdio")]
    pub output: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_output_topic() -> String {
    "ram-usage-data".to_string()
}

fn default_partitions() -> usize {
    4
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_watermark_interval() -> u64 {
    1000
}

fn default_checkpoint_interval() -> u64 {
    5000
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_stdio() -> String {
    "-".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl JobConfig {
    /// Load configuration from file and environment, then apply `cli`
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("JOB").try_parsing(true))
            .build()
            .context("Failed to read job configuration")?;

        let mut job: JobConfig = config
            .try_deserialize()
            .context("Invalid job configuration")?;
        job.apply(cli);
        job.validate()?;
        Ok(job)
    }

    /// Override loaded values with flags given on the command line
    fn apply(&mut self, cli: &Cli) {
        if let Some(topic) = &cli.topic {
            self.topic = topic.clone();
        }
        if let Some(output_topic) = &cli.output_topic {
            self.output_topic = output_topic.clone();
        }
        if cli.bootstrap_servers.is_some() {
            self.bootstrap_servers = cli.bootstrap_servers.clone();
        }
        if cli.group_id.is_some() {
            self.group_id = cli.group_id.clone();
        }
        if cli.zookeeper_connect.is_some() {
            self.zookeeper_connect = cli.zookeeper_connect.clone();
        }
        if let Some(partitions) = cli.partitions {
            self.partitions = partitions;
        }
        if let Some(window_size) = cli.window_size {
            self.window_size = window_size;
        }
        if let Some(metric) = cli.metric {
            self.metric = metric;
        }
        if let Some(ms) = cli.watermark_interval_ms {
            self.watermark_interval_ms = ms;
        }
        if let Some(ms) = cli.checkpoint_interval_ms {
            self.checkpoint_interval_ms = ms;
        }
        if let Some(secs) = cli.allowed_lateness_secs {
            self.allowed_lateness_secs = secs;
        }
        if let Some(dir) = &cli.checkpoint_dir {
            self.checkpoint_dir = dir.clone();
        }
        if let Some(input) = &cli.input {
            self.input = input.clone();
        }
        if let Some(output) = &cli.output {
            self.output = output.clone();
        }
        if let Some(port) = cli.api_port {
            self.api_port = port;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            bail!("An input topic is required (--topic or JOB_TOPIC)");
        }
        if self.partitions == 0 {
            bail!("partitions must be at least 1");
        }
        if self.window_size == 0 {
            bail!("window_size must be at least 1");
        }
        if self.watermark_interval_ms == 0 {
            bail!("watermark_interval_ms must be positive");
        }
        Ok(())
    }

    /// Connection properties handed to the transport
    pub fn bus(&self) -> BusProperties {
        BusProperties {
            topic: self.topic.clone(),
            output_topic: self.output_topic.clone(),
            bootstrap_servers: self.bootstrap_servers.clone(),
            group_id: self.group_id.clone(),
            zookeeper_connect: self.zookeeper_connect.clone(),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            partitions: self.partitions,
            window_size: self.window_size,
            metric: self.metric,
            checkpoint_interval: (self.checkpoint_interval_ms > 0)
                .then(|| Duration::from_millis(self.checkpoint_interval_ms)),
            watermark_interval: Duration::from_millis(self.watermark_interval_ms),
            allowed_lateness: Duration::from_secs(self.allowed_lateness_secs),
            ..PipelineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_with_topic_flag() {
        let cli = Cli::try_parse_from(["regression-job", "--topic", "container-stats"]).unwrap();
        let config = JobConfig::load(&cli).unwrap();

        assert_eq!(config.topic, "container-stats");
        assert_eq!(config.output_topic, "ram-usage-data");
        assert_eq!(config.partitions, 4);
        assert_eq!(config.window_size, 10);
        assert_eq!(config.metric, UsageMetric::Memory);
        assert_eq!(config.input, "-");
        assert_eq!(config.api_port, 8080);

        let pipeline = config.pipeline();
        assert_eq!(pipeline.checkpoint_interval, Some(Duration::from_secs(5)));
        assert_eq!(pipeline.watermark_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_topic_is_rejected() {
        let cli = Cli::try_parse_from(["regression-job"]).unwrap();
        assert!(JobConfig::load(&cli).is_err());
    }

    #[test]
    fn test_bus_flags_pass_through() {
        let cli = Cli::try_parse_from([
            "regression-job",
            "--topic",
            "stats",
            "--bootstrap.servers",
            "broker-1:9092,broker-2:9092",
            "--group.id",
            "regression",
            "--zookeeper.connect",
            "zk:2181",
            "--metric",
            "network_tx",
            "--checkpoint-interval-ms",
            "0",
        ])
        .unwrap();
        let config = JobConfig::load(&cli).unwrap();

        let bus = config.bus();
        assert_eq!(bus.topic, "stats");
        assert_eq!(
            bus.bootstrap_servers.as_deref(),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(bus.group_id.as_deref(), Some("regression"));
        assert_eq!(bus.zookeeper_connect.as_deref(), Some("zk:2181"));

        let pipeline = config.pipeline();
        assert_eq!(pipeline.metric, UsageMetric::NetworkTx);
        assert_eq!(pipeline.checkpoint_interval, None);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let contents = [
            "topic = \"from-file\"",
            "partitions = 8",
            "window_size = 5",
            "metric = \"cpu_system_percent\"",
        ];
        writeln!(file, "{}", contents.join("\n")).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from([
            "regression-job",
            "--config",
            &path,
            "--partitions",
            "2",
        ])
        .unwrap();
        let config = JobConfig::load(&cli).unwrap();

        assert_eq!(config.topic, "from-file");
        assert_eq!(config.partitions, 2);
        assert_eq!(config.window_size, 5);
        assert_eq!(config.metric, UsageMetric::CpuSystemPercent);
    }

    #[test]
    fn test_unknown_metric_flag_is_rejected() {
        let result = Cli::try_parse_from(["regression-job", "--topic", "t", "--metric", "disk"]);
        assert!(result.is_err());
    }
}
