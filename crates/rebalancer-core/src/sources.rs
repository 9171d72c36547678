//! Collaborator interfaces for inventory and telemetry
//!
//! The engine never talks to infrastructure APIs directly. Snapshot
//! construction consumes these traits; concrete adapters (an inventory
//! service client, a metrics store client, a file-backed source for
//! development) live outside the core crate.

use crate::model::{CapacityVector, PlacementConstraints, ResourceState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an inventory or metrics collaborator.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source read timed out")]
    Timeout,
}

/// Wire-facing description of a resource, prior to model validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub capacity: CapacityVector,
    pub state: ResourceState,
    #[serde(default)]
    pub overcommitted: bool,
}

/// Wire-facing description of a workload, prior to model validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub id: String,
    pub demand: CapacityVector,
    pub host: String,
    #[serde(default)]
    pub constraints: PlacementConstraints,
}

/// One listing read from a collaborator. The `generation` marker advances
/// whenever the collaborator's view of the cluster changes; the snapshot
/// builder compares generations across listings to detect torn reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub generation: u64,
    pub items: Vec<T>,
}

/// A single telemetry sample for one metric of one workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name: `cpu_millicores`, `memory_bytes`, `disk_bytes`, or a
    /// custom metric key.
    pub metric: String,
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Inventory collaborator: authoritative listings of resources and
/// workloads.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn list_resources(&self) -> Result<Listing<ResourceDescriptor>, SourceError>;

    async fn list_workloads(&self) -> Result<Listing<WorkloadDescriptor>, SourceError>;
}

/// Metrics collaborator: recent telemetry for one workload.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn metrics_for(
        &self,
        workload_id: &str,
        window: Duration,
    ) -> Result<Vec<MetricSample>, SourceError>;
}

/// Fold a sample stream into a peak-usage capacity vector. Returns `None`
/// when no samples were observed.
pub fn peak_usage(samples: &[MetricSample]) -> Option<CapacityVector> {
    if samples.is_empty() {
        return None;
    }
    let mut peak = CapacityVector::default();
    for sample in samples {
        match sample.metric.as_str() {
            "cpu_millicores" => {
                peak.cpu_millicores = peak.cpu_millicores.max(sample.value as u64)
            }
            "memory_bytes" => peak.memory_bytes = peak.memory_bytes.max(sample.value as u64),
            "disk_bytes" => peak.disk_bytes = peak.disk_bytes.max(sample.value as u64),
            other => {
                let entry = peak.custom.entry(other.to_string()).or_insert(0.0);
                *entry = entry.max(sample.value);
            }
        }
    }
    Some(peak)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(metric: &str, value: f64) -> MetricSample {
        MetricSample {
            metric: metric.to_string(),
            value,
            at: Utc::now(),
        }
    }

    #[test]
    fn peak_usage_takes_max_per_metric() {
        let samples = vec![
            sample("cpu_millicores", 200.0),
            sample("cpu_millicores", 850.0),
            sample("cpu_millicores", 400.0),
            sample("memory_bytes", 1024.0),
            sample("iops", 90.0),
            sample("iops", 120.0),
        ];
        let peak = peak_usage(&samples).unwrap();
        assert_eq!(peak.cpu_millicores, 850);
        assert_eq!(peak.memory_bytes, 1024);
        assert_eq!(peak.custom["iops"], 120.0);
    }

    #[test]
    fn peak_usage_empty_is_none() {
        assert!(peak_usage(&[]).is_none());
    }
}
