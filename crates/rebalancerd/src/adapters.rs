//! Development adapters for the engine's collaborator seams
//!
//! The real inventory service, metrics store, and infrastructure drivers
//! live outside this repository. For local runs and dry runs the daemon
//! wires the engine to a JSON cluster description on disk and a driver
//! that only logs what it would do.

use async_trait::async_trait;
use rebalancer_core::{
    Action, ActionDriver, DriverError, InventorySource, Listing, MetricSample, MetricsSource,
    ResourceDescriptor, SourceError, WorkloadDescriptor,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// On-disk cluster description consumed by [`FileInventorySource`].
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterFile {
    pub generation: u64,
    pub resources: Vec<ResourceDescriptor>,
    pub workloads: Vec<WorkloadDescriptor>,
    /// Optional telemetry samples keyed by workload id.
    #[serde(default)]
    pub samples: BTreeMap<String, Vec<MetricSample>>,
}

/// Inventory and metrics source backed by a JSON file, re-read on every
/// call so edits show up in the next audit cycle.
pub struct FileInventorySource {
    path: PathBuf,
}

impl FileInventorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<ClusterFile, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl InventorySource for FileInventorySource {
    async fn list_resources(&self) -> Result<Listing<ResourceDescriptor>, SourceError> {
        let cluster = self.read().await?;
        Ok(Listing {
            generation: cluster.generation,
            items: cluster.resources,
        })
    }

    async fn list_workloads(&self) -> Result<Listing<WorkloadDescriptor>, SourceError> {
        let cluster = self.read().await?;
        Ok(Listing {
            generation: cluster.generation,
            items: cluster.workloads,
        })
    }
}

#[async_trait]
impl MetricsSource for FileInventorySource {
    async fn metrics_for(
        &self,
        workload_id: &str,
        _window: Duration,
    ) -> Result<Vec<MetricSample>, SourceError> {
        let cluster = self.read().await?;
        Ok(cluster
            .samples
            .get(workload_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Driver that logs every action instead of touching infrastructure.
#[derive(Debug, Default)]
pub struct DryRunDriver;

#[async_trait]
impl ActionDriver for DryRunDriver {
    async fn execute(&self, action: &Action) -> Result<(), DriverError> {
        info!(
            action_id = %action.id,
            action = %action.describe(),
            "Dry run: action accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CLUSTER_JSON: &str = r#"{
        "generation": 3,
        "resources": [
            {
                "id": "h1",
                "capacity": {"cpu_millicores": 10000, "memory_bytes": 68719476736, "disk_bytes": 0},
                "state": "active"
            }
        ],
        "workloads": [
            {
                "id": "w1",
                "demand": {"cpu_millicores": 2000, "memory_bytes": 1073741824, "disk_bytes": 0},
                "host": "h1"
            }
        ],
        "samples": {
            "w1": [
                {"metric": "cpu_millicores", "value": 900.0, "at": "2026-08-30T00:00:00Z"}
            ]
        }
    }"#;

    #[tokio::test]
    async fn file_source_serves_listings_and_samples() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CLUSTER_JSON.as_bytes()).unwrap();
        let source = FileInventorySource::new(file.path());

        let resources = source.list_resources().await.unwrap();
        assert_eq!(resources.generation, 3);
        assert_eq!(resources.items[0].id, "h1");

        let workloads = source.list_workloads().await.unwrap();
        assert_eq!(workloads.generation, 3);
        assert_eq!(workloads.items[0].host, "h1");

        let samples = source
            .metrics_for("w1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 900.0);

        assert!(source
            .metrics_for("unknown", Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let source = FileInventorySource::new("/nonexistent/cluster.json");
        let err = source.list_resources().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn malformed_file_is_unavailable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        let source = FileInventorySource::new(file.path());
        assert!(source.list_workloads().await.is_err());
    }
}
