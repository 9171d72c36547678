//! Cluster data model
//!
//! Resources (hosts), workloads (migratable compute units), and the
//! immutable point-in-time snapshot strategies reason over. Model values
//! are only mutated while a snapshot is being assembled; once a
//! [`ClusterSnapshot`] exists its contents are read-only.

mod snapshot;

pub use snapshot::{
    ClusterSnapshot, SnapshotBuilder, SnapshotConfig, SnapshotViolation,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A vector of resource quantities. Custom metrics use a `BTreeMap` so
/// iteration order, and therefore serialization, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityVector {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, f64>,
}

impl CapacityVector {
    pub fn new(cpu_millicores: u64, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
            disk_bytes,
            custom: BTreeMap::new(),
        }
    }

    /// Whether a demand of `self` fits inside `available`.
    pub fn fits_within(&self, available: &CapacityVector) -> bool {
        self.cpu_millicores <= available.cpu_millicores
            && self.memory_bytes <= available.memory_bytes
            && self.disk_bytes <= available.disk_bytes
            && self
                .custom
                .iter()
                .all(|(k, v)| available.custom.get(k).is_some_and(|a| v <= a))
    }

    pub fn add(&mut self, other: &CapacityVector) {
        self.cpu_millicores += other.cpu_millicores;
        self.memory_bytes += other.memory_bytes;
        self.disk_bytes += other.disk_bytes;
        for (k, v) in &other.custom {
            *self.custom.entry(k.clone()).or_insert(0.0) += v;
        }
    }

    /// Component-wise subtraction, saturating at zero.
    pub fn saturating_sub(&self, other: &CapacityVector) -> CapacityVector {
        CapacityVector {
            cpu_millicores: self.cpu_millicores.saturating_sub(other.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            disk_bytes: self.disk_bytes.saturating_sub(other.disk_bytes),
            custom: self
                .custom
                .iter()
                .map(|(k, v)| {
                    let used = other.custom.get(k).copied().unwrap_or(0.0);
                    (k.clone(), (v - used).max(0.0))
                })
                .collect(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0
            && self.memory_bytes == 0
            && self.disk_bytes == 0
            && self.custom.values().all(|v| *v == 0.0)
    }
}

/// Operational state of a resource as reported by inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Active,
    Maintenance,
    Disabled,
}

/// A physical or logical infrastructure unit (host, node).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub capacity: CapacityVector,
    pub state: ResourceState,
    /// When set, total hosted demand is allowed to exceed capacity.
    #[serde(default)]
    pub overcommitted: bool,
    /// Ids of workloads hosted on this resource at snapshot time.
    #[serde(default)]
    pub workloads: BTreeSet<String>,
}

impl Resource {
    pub fn is_schedulable(&self) -> bool {
        self.state == ResourceState::Active
    }
}

/// Placement constraints a strategy must honor for a workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    /// Workload ids this workload wants to share a host with.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub affinity: BTreeSet<String>,
    /// Workload ids this workload must not share a host with.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub anti_affinity: BTreeSet<String>,
    /// Pinned workloads are never proposed for migration.
    #[serde(default)]
    pub pinned: bool,
}

/// A migratable unit of compute (virtual machine, container).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    /// Requested resource demand, as reported by inventory.
    pub demand: CapacityVector,
    /// Peak usage observed over the metrics window, when telemetry was
    /// available for this workload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_demand: Option<CapacityVector>,
    /// Id of the hosting resource. Always resolves inside the snapshot the
    /// workload belongs to.
    pub host: String,
    #[serde(default)]
    pub constraints: PlacementConstraints,
}

impl Workload {
    /// Demand to plan against: observed peak when known, requested otherwise.
    pub fn effective_demand(&self) -> &CapacityVector {
        self.observed_demand.as_ref().unwrap_or(&self.demand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_within_respects_all_axes() {
        let demand = CapacityVector::new(4000, 1 << 30, 0);
        let mut free = CapacityVector::new(4000, 2 << 30, 10);
        assert!(demand.fits_within(&free));

        free.cpu_millicores = 3999;
        assert!(!demand.fits_within(&free));
    }

    #[test]
    fn fits_within_requires_custom_metric_presence() {
        let mut demand = CapacityVector::new(100, 100, 0);
        demand.custom.insert("gpu".to_string(), 1.0);

        let free = CapacityVector::new(1000, 1000, 0);
        assert!(!demand.fits_within(&free));

        let mut free_with_gpu = free.clone();
        free_with_gpu.custom.insert("gpu".to_string(), 2.0);
        assert!(demand.fits_within(&free_with_gpu));
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        let cap = CapacityVector::new(1000, 100, 0);
        let used = CapacityVector::new(1500, 40, 0);
        let free = cap.saturating_sub(&used);
        assert_eq!(free.cpu_millicores, 0);
        assert_eq!(free.memory_bytes, 60);
    }

    #[test]
    fn effective_demand_prefers_observed() {
        let w = Workload {
            id: "w1".to_string(),
            demand: CapacityVector::new(1000, 0, 0),
            observed_demand: Some(CapacityVector::new(250, 0, 0)),
            host: "h1".to_string(),
            constraints: PlacementConstraints::default(),
        };
        assert_eq!(w.effective_demand().cpu_millicores, 250);
    }
}
