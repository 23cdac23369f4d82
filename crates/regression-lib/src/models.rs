//! Core data models for the regression job

use serde::{Deserialize, Serialize};
use std::fmt;

/// Partitioning key: one machine/container pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerKey {
    pub machine_id: String,
    pub container_id: String,
}

impl ContainerKey {
    pub fn new(machine_id: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            container_id: container_id.into(),
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.machine_id, self.container_id)
    }
}

/// A single usage observation decoded from the input topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub machine_id: String,
    pub container_id: String,
    /// Event time in whole seconds since the Unix epoch (never negative)
    pub event_time: i64,
    /// Value of the configured usage metric
    pub usage: i64,
}

impl UsageSample {
    /// Key this sample is partitioned by
    pub fn key(&self) -> ContainerKey {
        ContainerKey::new(&self.machine_id, &self.container_id)
    }
}

/// Model coefficients emitted after refining a key with one sample
///
/// Serializes directly to the output wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(rename = "machine_name")]
    pub machine_id: String,
    #[serde(rename = "container_name")]
    pub container_id: String,
    #[serde(rename = "model_intercept")]
    pub intercept: f64,
    #[serde(rename = "model_slope")]
    pub slope: f64,
    #[serde(rename = "model_slope_err")]
    pub slope_std_err: f64,
    /// Event time of the sample that produced this update
    pub x: i64,
    /// Usage value of the sample that produced this update
    pub y: i64,
}

impl UpdateRecord {
    pub fn key(&self) -> ContainerKey {
        ContainerKey::new(&self.machine_id, &self.container_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_record_wire_field_names() {
        let record = UpdateRecord {
            machine_id: "node-1".to_string(),
            container_id: "redis".to_string(),
            intercept: 1.5,
            slope: 0.25,
            slope_std_err: 0.0,
            x: 1_500_000_000,
            y: 4096,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["machine_name"], "node-1");
        assert_eq!(value["container_name"], "redis");
        assert_eq!(value["model_intercept"], 1.5);
        assert_eq!(value["model_slope"], 0.25);
        assert_eq!(value["model_slope_err"], 0.0);
        assert_eq!(value["x"], 1_500_000_000i64);
        assert_eq!(value["y"], 4096);
    }

    #[test]
    fn test_key_display() {
        let key = ContainerKey::new("node-1", "redis");
        assert_eq!(key.to_string(), "node-1/redis");
    }
}
