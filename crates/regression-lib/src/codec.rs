//! Wire codecs for the input and output topics
//!
//! Input messages are cAdvisor-style container stats documents; only the
//! identifying names, the timestamp and the selected usage metric are read.
//! Output messages are the JSON form of [`UpdateRecord`].

use crate::error::CodecError;
use crate::models::{UpdateRecord, UsageSample};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which container statistic is regressed against time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetric {
    /// `container_stats.memory.usage` in bytes
    #[default]
    Memory,
    /// `container_stats.network.tx_bytes`
    NetworkTx,
    /// System CPU time as a whole percentage of total CPU time
    CpuSystemPercent,
}

impl UsageMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageMetric::Memory => "memory",
            UsageMetric::NetworkTx => "network_tx",
            UsageMetric::CpuSystemPercent => "cpu_system_percent",
        }
    }

    fn extract(&self, stats: &ContainerStats) -> Option<i64> {
        match self {
            UsageMetric::Memory => stats.memory.as_ref()?.usage,
            UsageMetric::NetworkTx => stats.network.as_ref()?.tx_bytes,
            UsageMetric::CpuSystemPercent => {
                let usage = stats.cpu.as_ref()?.usage.as_ref()?;
                let (system, total) = (usage.system?, usage.total?);
                if total == 0 {
                    return None;
                }
                Some((system as f64 / total as f64 * 100.0) as i64)
            }
        }
    }
}

impl fmt::Display for UsageMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(UsageMetric::Memory),
            "network_tx" => Ok(UsageMetric::NetworkTx),
            "cpu_system_percent" => Ok(UsageMetric::CpuSystemPercent),
            other => Err(format!(
                "unknown metric '{}', expected memory, network_tx or cpu_system_percent",
                other
            )),
        }
    }
}

/// Raw input document as published by the stats exporter
#[derive(Debug, Deserialize)]
struct RawSample {
    machine_name: String,
    container_name: String,
    timestamp: String,
    #[serde(default)]
    container_stats: ContainerStats,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerStats {
    memory: Option<MemoryStats>,
    network: Option<NetworkStats>,
    cpu: Option<CpuStats>,
}

#[derive(Debug, Deserialize)]
struct MemoryStats {
    usage: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NetworkStats {
    tx_bytes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CpuStats {
    usage: Option<CpuUsage>,
}

#[derive(Debug, Deserialize)]
struct CpuUsage {
    system: Option<u64>,
    total: Option<u64>,
}

/// Parse an ISO-8601 instant into whole epoch seconds
///
/// Fractional seconds of any precision are accepted and floored away.
pub fn parse_event_time(value: &str) -> Result<i64, CodecError> {
    let instant =
        DateTime::parse_from_rfc3339(value).map_err(|_| CodecError::MalformedTimestamp {
            value: value.to_string(),
        })?;

    let secs = instant.timestamp();
    if secs < 0 {
        return Err(CodecError::NegativeTimestamp {
            value: value.to_string(),
        });
    }
    Ok(secs)
}

/// Decode one input message into a sample
pub fn decode_sample(payload: &[u8], metric: UsageMetric) -> Result<UsageSample, CodecError> {
    let raw: RawSample = serde_json::from_slice(payload).map_err(CodecError::InvalidPayload)?;

    let event_time = parse_event_time(&raw.timestamp)?;
    let usage = metric
        .extract(&raw.container_stats)
        .ok_or(CodecError::MissingMetric {
            metric: metric.as_str(),
        })?;

    Ok(UsageSample {
        machine_id: raw.machine_name,
        container_id: raw.container_name,
        event_time,
        usage,
    })
}

/// Encode an update record for the output topic
pub fn encode_update(record: &UpdateRecord) -> Result<Vec<u8>, CodecError> {
    if !(record.intercept.is_finite()
        && record.slope.is_finite()
        && record.slope_std_err.is_finite())
    {
        // serde_json would write these as null, which consumers cannot use
        return Err(CodecError::Encode(serde::ser::Error::custom(
            "non-finite model coefficient",
        )));
    }

    serde_json::to_vec(record).map_err(CodecError::Encode)
}
