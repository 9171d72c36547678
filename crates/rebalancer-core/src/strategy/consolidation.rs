//! Workload consolidation strategy
//!
//! Packs workloads off under-utilized hosts onto the remaining active
//! hosts, then powers down every host it managed to empty. The heuristic is
//! first-fit over hosts in id order, which keeps proposals deterministic
//! for a given snapshot.

use super::Strategy;
use crate::action::{ActionDraft, ProposedActions};
use crate::error::StrategyError;
use crate::model::{CapacityVector, ClusterSnapshot, Resource};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// CPU utilization fraction at or below which an active host becomes a
    /// consolidation candidate.
    pub utilization_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            utilization_threshold: 0.3,
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkloadConsolidation {
    config: ConsolidationConfig,
}

impl WorkloadConsolidation {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    fn cpu_utilization(&self, snapshot: &ClusterSnapshot, resource: &Resource) -> f64 {
        if resource.capacity.cpu_millicores == 0 {
            return 1.0;
        }
        let used: u64 = resource
            .workloads
            .iter()
            .map(|id| {
                snapshot
                    .workload(id)
                    .map(|w| w.effective_demand().cpu_millicores)
                    .unwrap_or(0)
            })
            .sum();
        used as f64 / resource.capacity.cpu_millicores as f64
    }
}

impl Strategy for WorkloadConsolidation {
    fn name(&self) -> &str {
        "consolidation"
    }

    fn goal(&self) -> &str {
        "reduce the number of powered-on hosts"
    }

    fn compute(&self, snapshot: &ClusterSnapshot) -> Result<ProposedActions, StrategyError> {
        // Candidate hosts to empty, everything else active receives moves.
        let mut candidates: Vec<&Resource> = Vec::new();
        let mut receivers: Vec<&Resource> = Vec::new();
        for resource in snapshot.resources() {
            if !resource.is_schedulable() {
                continue;
            }
            if !resource.workloads.is_empty()
                && self.cpu_utilization(snapshot, resource) <= self.config.utilization_threshold
            {
                candidates.push(resource);
            } else {
                receivers.push(resource);
            }
        }

        if candidates.is_empty() {
            debug!(scope = %snapshot.scope, "No under-utilized hosts, nothing to consolidate");
            return Ok(ProposedActions {
                goal_satisfaction: 1.0,
                ..Default::default()
            });
        }

        // Simulated post-move state: headroom and hosted sets per receiver.
        let mut free: BTreeMap<&str, CapacityVector> = receivers
            .iter()
            .map(|r| {
                (
                    r.id.as_str(),
                    snapshot.free_capacity(&r.id).unwrap_or_default(),
                )
            })
            .collect();
        let mut hosted: BTreeMap<&str, BTreeSet<String>> = receivers
            .iter()
            .map(|r| (r.id.as_str(), r.workloads.iter().cloned().collect()))
            .collect();

        let mut drafts = Vec::new();
        let mut emptied = 0usize;

        for candidate in &candidates {
            let mut moved_all = true;
            let mut moves = Vec::new();

            for workload in snapshot.workloads().filter(|w| w.host == candidate.id) {
                if workload.constraints.pinned {
                    moved_all = false;
                    continue;
                }
                let demand = workload.effective_demand().clone();

                let destination = receivers.iter().find(|r| {
                    let headroom = &free[r.id.as_str()];
                    let residents = &hosted[r.id.as_str()];
                    demand.fits_within(headroom)
                        && workload
                            .constraints
                            .anti_affinity
                            .iter()
                            .all(|other| !residents.contains(other))
                        && workload
                            .constraints
                            .affinity
                            .iter()
                            .all(|partner| residents.contains(partner))
                });

                match destination {
                    Some(r) => {
                        if let Some(headroom) = free.get_mut(r.id.as_str()) {
                            *headroom = headroom.saturating_sub(&demand);
                        }
                        if let Some(residents) = hosted.get_mut(r.id.as_str()) {
                            residents.insert(workload.id.clone());
                        }
                        moves.push(ActionDraft::migrate(
                            &workload.id,
                            &candidate.id,
                            &r.id,
                            &demand,
                        ));
                    }
                    None => moved_all = false,
                }
            }

            let had_moves = !moves.is_empty();
            drafts.append(&mut moves);
            if moved_all && had_moves {
                drafts.push(ActionDraft::change_power_state(&candidate.id, false));
                emptied += 1;
            }
        }

        if drafts.is_empty() {
            return Err(StrategyError::CannotPlan(format!(
                "{} under-utilized hosts but no receiver has headroom",
                candidates.len()
            )));
        }

        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("candidate_hosts".to_string(), candidates.len().to_string());
        diagnostics.insert("emptied_hosts".to_string(), emptied.to_string());

        Ok(ProposedActions {
            drafts,
            goal_satisfaction: emptied as f64 / candidates.len() as f64,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::model::{PlacementConstraints, ResourceState, Workload};

    fn resource(id: &str, cpu: u64) -> Resource {
        Resource {
            id: id.to_string(),
            capacity: CapacityVector::new(cpu, 64 << 30, 0),
            state: ResourceState::Active,
            overcommitted: false,
            workloads: Default::default(),
        }
    }

    fn workload(id: &str, host: &str, cpu: u64) -> Workload {
        Workload {
            id: id.to_string(),
            demand: CapacityVector::new(cpu, 1 << 30, 0),
            observed_demand: None,
            host: host.to_string(),
            constraints: PlacementConstraints::default(),
        }
    }

    #[test]
    fn empties_and_powers_down_idle_host() {
        // h2 is 10% utilized, h1 has plenty of headroom.
        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![resource("h1", 10_000), resource("h2", 10_000)],
            vec![
                workload("w1", "h1", 6_000),
                workload("w2", "h2", 1_000),
            ],
        )
        .unwrap();

        let proposed = WorkloadConsolidation::default().compute(&snapshot).unwrap();
        assert_eq!(proposed.drafts.len(), 2);
        assert!(matches!(
            proposed.drafts[0].kind,
            ActionKind::Migrate { ref destination, .. } if destination == "h1"
        ));
        assert!(matches!(
            proposed.drafts[1].kind,
            ActionKind::ChangePowerState { powered_on: false }
        ));
        assert_eq!(proposed.goal_satisfaction, 1.0);
    }

    #[test]
    fn pinned_workload_blocks_power_down() {
        let mut pinned = workload("w2", "h2", 1_000);
        pinned.constraints.pinned = true;

        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![resource("h1", 10_000), resource("h2", 10_000)],
            vec![
                workload("w1", "h1", 6_000),
                pinned,
                workload("w3", "h2", 1_000),
            ],
        )
        .unwrap();

        let proposed = WorkloadConsolidation::default().compute(&snapshot).unwrap();
        // w3 moves, w2 stays, so h2 is never powered down.
        assert_eq!(proposed.drafts.len(), 1);
        assert!(matches!(proposed.drafts[0].kind, ActionKind::Migrate { .. }));
        assert_eq!(proposed.goal_satisfaction, 0.0);
    }

    #[test]
    fn anti_affinity_is_respected() {
        let mut w2 = workload("w2", "h2", 1_000);
        w2.constraints.anti_affinity.insert("w1".to_string());

        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![resource("h1", 10_000), resource("h2", 10_000)],
            vec![workload("w1", "h1", 6_000), w2],
        )
        .unwrap();

        // The only receiver hosts w1, which w2 refuses to share with.
        let err = WorkloadConsolidation::default()
            .compute(&snapshot)
            .unwrap_err();
        assert!(matches!(err, StrategyError::CannotPlan(_)));
    }

    #[test]
    fn affinity_keeps_partners_colocated() {
        let mut w2 = workload("w2", "h2", 1_000);
        w2.constraints.affinity.insert("w3".to_string());

        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![
                resource("h1", 10_000),
                resource("h2", 10_000),
                resource("h3", 10_000),
            ],
            vec![workload("w1", "h1", 6_000), w2, workload("w3", "h3", 6_000)],
        )
        .unwrap();

        let proposed = WorkloadConsolidation::default().compute(&snapshot).unwrap();
        // h1 comes first in id order but does not host w3; the move may
        // only land where the affinity partner already lives.
        assert!(matches!(
            proposed.drafts[0].kind,
            ActionKind::Migrate { ref destination, .. } if destination == "h3"
        ));
        assert!(matches!(
            proposed.drafts[1].kind,
            ActionKind::ChangePowerState { powered_on: false }
        ));
    }

    #[test]
    fn affinity_without_colocated_receiver_blocks_the_move() {
        let mut w2 = workload("w2", "h2", 2_000);
        w2.constraints.affinity.insert("w3".to_string());

        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![
                resource("h1", 10_000),
                resource("h2", 10_000),
                resource("h3", 7_000),
            ],
            vec![workload("w1", "h1", 6_000), w2, workload("w3", "h3", 6_000)],
        )
        .unwrap();

        // h3 hosts the partner but lacks headroom; h1 would separate the
        // pair. The workload stays put rather than violating affinity.
        let err = WorkloadConsolidation::default()
            .compute(&snapshot)
            .unwrap_err();
        assert!(matches!(err, StrategyError::CannotPlan(_)));
    }

    #[test]
    fn balanced_cluster_proposes_nothing() {
        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![resource("h1", 10_000), resource("h2", 10_000)],
            vec![
                workload("w1", "h1", 6_000),
                workload("w2", "h2", 6_000),
            ],
        )
        .unwrap();

        let proposed = WorkloadConsolidation::default().compute(&snapshot).unwrap();
        assert!(proposed.drafts.is_empty());
        assert_eq!(proposed.goal_satisfaction, 1.0);
    }

    #[test]
    fn proposal_is_deterministic() {
        let snapshot = ClusterSnapshot::assemble(
            "test",
            vec![
                resource("h1", 20_000),
                resource("h2", 10_000),
                resource("h3", 10_000),
            ],
            vec![
                workload("w1", "h1", 12_000),
                workload("w2", "h2", 1_000),
                workload("w3", "h3", 2_000),
            ],
        )
        .unwrap();

        let strategy = WorkloadConsolidation::default();
        let a = strategy.compute(&snapshot).unwrap();
        let b = strategy.compute(&snapshot).unwrap();
        assert_eq!(a.drafts, b.drafts);
    }
}
