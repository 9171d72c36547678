//! Cluster snapshot assembly
//!
//! Builds an immutable, internally consistent view of the cluster from the
//! inventory and metrics collaborators. A build attempt that observes a torn
//! read (listing generations disagree) or an integrity violation is retried
//! up to a bounded attempt count; a partial snapshot is never returned.

use super::{CapacityVector, Resource, Workload};
use crate::error::EngineError;
use crate::sources::{peak_usage, InventorySource, MetricsSource, SourceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Integrity violations detected while assembling a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotViolation {
    #[error("workload {workload} references host {host} absent from the snapshot")]
    DanglingHost { workload: String, host: String },

    #[error("duplicate resource id {0}")]
    DuplicateResource(String),

    #[error("duplicate workload id {0}")]
    DuplicateWorkload(String),

    #[error("resource {resource} demand exceeds capacity and is not overcommitted")]
    OverCapacity { resource: String },
}

/// Immutable point-in-time view of the cluster.
///
/// Owned by the audit coordinator for the duration of one cycle and shared
/// read-only (`Arc`) with strategy evaluations. There are no mutating
/// accessors; a new cycle builds a new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub scope: String,
    pub taken_at: DateTime<Utc>,
    resources: BTreeMap<String, Resource>,
    workloads: BTreeMap<String, Workload>,
}

impl ClusterSnapshot {
    /// Assemble a snapshot from model values, deriving each resource's
    /// hosted-workload set from workload host references and enforcing
    /// referential integrity and capacity invariants.
    pub fn assemble(
        scope: impl Into<String>,
        resources: Vec<Resource>,
        workloads: Vec<Workload>,
    ) -> Result<Self, SnapshotViolation> {
        let mut resource_map: BTreeMap<String, Resource> = BTreeMap::new();
        for mut resource in resources {
            resource.workloads.clear();
            if resource_map
                .insert(resource.id.clone(), resource.clone())
                .is_some()
            {
                return Err(SnapshotViolation::DuplicateResource(resource.id));
            }
        }

        let mut workload_map: BTreeMap<String, Workload> = BTreeMap::new();
        for workload in workloads {
            let host = resource_map.get_mut(&workload.host).ok_or_else(|| {
                SnapshotViolation::DanglingHost {
                    workload: workload.id.clone(),
                    host: workload.host.clone(),
                }
            })?;
            host.workloads.insert(workload.id.clone());
            if workload_map
                .insert(workload.id.clone(), workload.clone())
                .is_some()
            {
                return Err(SnapshotViolation::DuplicateWorkload(workload.id));
            }
        }

        for resource in resource_map.values() {
            if resource.overcommitted {
                continue;
            }
            let mut assigned = CapacityVector::default();
            for id in &resource.workloads {
                assigned.add(workload_map[id].effective_demand());
            }
            if !assigned.fits_within(&resource.capacity) {
                return Err(SnapshotViolation::OverCapacity {
                    resource: resource.id.clone(),
                });
            }
        }

        Ok(Self {
            scope: scope.into(),
            taken_at: Utc::now(),
            resources: resource_map,
            workloads: workload_map,
        })
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn workload(&self, id: &str) -> Option<&Workload> {
        self.workloads.get(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn workloads(&self) -> impl Iterator<Item = &Workload> {
        self.workloads.values()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    /// Capacity left on a resource after subtracting the effective demand of
    /// everything it hosts.
    pub fn free_capacity(&self, resource_id: &str) -> Option<CapacityVector> {
        let resource = self.resources.get(resource_id)?;
        let mut assigned = CapacityVector::default();
        for id in &resource.workloads {
            assigned.add(self.workloads[id].effective_demand());
        }
        Some(resource.capacity.saturating_sub(&assigned))
    }
}

/// Bounds and timeouts for snapshot construction.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Build attempts before surfacing a failed cycle.
    pub max_attempts: u32,
    /// Delay between build attempts.
    pub retry_backoff: Duration,
    /// Timeout applied to every collaborator call.
    pub source_timeout: Duration,
    /// Telemetry lookback window passed to the metrics source.
    pub metrics_window: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            source_timeout: Duration::from_secs(10),
            metrics_window: Duration::from_secs(15 * 60),
        }
    }
}

/// Builds [`ClusterSnapshot`]s from the inventory and metrics collaborators.
pub struct SnapshotBuilder {
    config: SnapshotConfig,
}

enum AttemptError {
    Unavailable {
        source_kind: &'static str,
        detail: String,
    },
    Inconsistent(String),
}

impl SnapshotBuilder {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Build a snapshot, retrying torn or unavailable reads up to the
    /// configured attempt bound.
    pub async fn build(
        &self,
        scope: &str,
        inventory: Arc<dyn InventorySource>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Result<ClusterSnapshot, EngineError> {
        for attempt in 1..=self.config.max_attempts {
            match self
                .attempt(scope, inventory.clone(), metrics.clone())
                .await
            {
                Ok(snapshot) => {
                    debug!(
                        scope = %scope,
                        attempt,
                        resources = snapshot.resource_count(),
                        workloads = snapshot.workload_count(),
                        "Snapshot assembled"
                    );
                    return Ok(snapshot);
                }
                Err(AttemptError::Unavailable {
                    source_kind,
                    detail,
                }) => {
                    warn!(scope = %scope, attempt, source_kind, detail = %detail, "Snapshot build attempt failed");
                    if attempt == self.config.max_attempts {
                        return Err(EngineError::DataUnavailable {
                            source_kind,
                            detail,
                        });
                    }
                }
                Err(AttemptError::Inconsistent(detail)) => {
                    warn!(scope = %scope, attempt, detail = %detail, "Snapshot build attempt inconsistent");
                }
            }
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }

        Err(EngineError::InconsistentSnapshot {
            attempts: self.config.max_attempts,
        })
    }

    async fn attempt(
        &self,
        scope: &str,
        inventory: Arc<dyn InventorySource>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Result<ClusterSnapshot, AttemptError> {
        let timeout = self.config.source_timeout;

        let (resources, workloads) = tokio::join!(
            tokio::time::timeout(timeout, inventory.list_resources()),
            tokio::time::timeout(timeout, inventory.list_workloads()),
        );
        let resources = flatten("inventory", resources)?;
        let workloads = flatten("inventory", workloads)?;

        // Both listings must come from the same inventory generation or the
        // read is torn.
        if resources.generation != workloads.generation {
            return Err(AttemptError::Inconsistent(format!(
                "inventory changed mid-read (resource generation {}, workload generation {})",
                resources.generation, workloads.generation
            )));
        }

        let resources: Vec<Resource> = resources
            .items
            .into_iter()
            .map(|d| Resource {
                id: d.id,
                capacity: d.capacity,
                state: d.state,
                overcommitted: d.overcommitted,
                workloads: Default::default(),
            })
            .collect();

        // Telemetry reads for distinct workloads are independent, issue them
        // concurrently.
        let window = self.config.metrics_window;
        let mut fetches = JoinSet::new();
        for descriptor in &workloads.items {
            let metrics = metrics.clone();
            let id = descriptor.id.clone();
            fetches.spawn(async move {
                let samples = tokio::time::timeout(timeout, metrics.metrics_for(&id, window))
                    .await
                    .map_err(|_| SourceError::Timeout)
                    .and_then(|r| r)?;
                Ok::<_, SourceError>((id, peak_usage(&samples)))
            });
        }

        let mut observed: BTreeMap<String, CapacityVector> = BTreeMap::new();
        while let Some(joined) = fetches.join_next().await {
            let result = joined.map_err(|e| AttemptError::Unavailable {
                source_kind: "metrics",
                detail: format!("telemetry task panicked: {e}"),
            })?;
            match result {
                Ok((id, Some(peak))) => {
                    observed.insert(id, peak);
                }
                Ok((_, None)) => {}
                Err(e) => {
                    return Err(AttemptError::Unavailable {
                        source_kind: "metrics",
                        detail: e.to_string(),
                    })
                }
            }
        }

        let workloads: Vec<Workload> = workloads
            .items
            .into_iter()
            .map(|d| {
                let observed_demand = observed.remove(&d.id);
                Workload {
                    id: d.id,
                    demand: d.demand,
                    observed_demand,
                    host: d.host,
                    constraints: d.constraints,
                }
            })
            .collect();

        ClusterSnapshot::assemble(scope, resources, workloads)
            .map_err(|v| AttemptError::Inconsistent(v.to_string()))
    }
}

fn flatten<T>(
    source_kind: &'static str,
    outcome: Result<Result<T, SourceError>, tokio::time::error::Elapsed>,
) -> Result<T, AttemptError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AttemptError::Unavailable {
            source_kind,
            detail: e.to_string(),
        }),
        Err(_) => Err(AttemptError::Unavailable {
            source_kind,
            detail: "read timed out".to_string(),
        }),
    }
}
