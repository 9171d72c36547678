//! Strategy invocation and structural validation
//!
//! The engine never interprets action semantics. It hands the snapshot to
//! the strategy and checks only that the returned drafts are structurally
//! sound: every reference resolves inside the snapshot the strategy was
//! given, and no workload is targeted by two drafts of different kinds
//! (same-kind duplicates are allowed and linearized later by submission
//! order).

use super::Strategy;
use crate::action::{ActionKind, ProposedActions, TargetRef};
use crate::error::{EngineError, StrategyError};
use crate::model::ClusterSnapshot;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct StrategyEngine;

impl StrategyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run a strategy against a snapshot and validate its proposal.
    pub fn run(
        &self,
        strategy: &dyn Strategy,
        snapshot: &ClusterSnapshot,
    ) -> Result<ProposedActions, EngineError> {
        let started = Instant::now();
        let proposed = strategy.compute(snapshot)?;
        self.validate(&proposed, snapshot)?;

        info!(
            strategy = strategy.name(),
            scope = %snapshot.scope,
            drafts = proposed.drafts.len(),
            goal_satisfaction = proposed.goal_satisfaction,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Strategy computed"
        );
        Ok(proposed)
    }

    fn validate(
        &self,
        proposed: &ProposedActions,
        snapshot: &ClusterSnapshot,
    ) -> Result<(), EngineError> {
        let mut kind_by_workload: HashMap<&str, &'static str> = HashMap::new();

        for (index, draft) in proposed.drafts.iter().enumerate() {
            self.check_ref(&draft.target, snapshot, index)?;
            for condition in draft.preconditions.iter().chain(&draft.postconditions) {
                self.check_ref(&condition.target, snapshot, index)?;
            }
            if let ActionKind::Migrate {
                source,
                destination,
            } = &draft.kind
            {
                for host in [source, destination] {
                    self.check_ref(&TargetRef::Resource(host.clone()), snapshot, index)?;
                }
            }

            // Two different kinds of change to one workload cannot be
            // linearized by a tie-break; reject them outright.
            if let TargetRef::Workload(id) = &draft.target {
                let label = draft.kind.label();
                match kind_by_workload.get(id.as_str()) {
                    Some(prior) if *prior != label => {
                        return Err(StrategyError::InvalidProposal(format!(
                            "workload {id} targeted by conflicting actions ({prior} and {label})"
                        ))
                        .into());
                    }
                    _ => {
                        kind_by_workload.insert(id.as_str(), label);
                    }
                }
            }
        }

        debug!(drafts = proposed.drafts.len(), "Proposal validated");
        Ok(())
    }

    fn check_ref(
        &self,
        target: &TargetRef,
        snapshot: &ClusterSnapshot,
        index: usize,
    ) -> Result<(), EngineError> {
        let resolves = match target {
            TargetRef::Workload(id) => snapshot.workload(id).is_some(),
            TargetRef::Resource(id) => snapshot.resource(id).is_some(),
        };
        if resolves {
            Ok(())
        } else {
            Err(StrategyError::InvalidProposal(format!(
                "draft {index} references {target} absent from the snapshot"
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionDraft;
    use crate::model::{
        CapacityVector, PlacementConstraints, Resource, ResourceState, Workload,
    };

    fn snapshot() -> ClusterSnapshot {
        let resources = vec![
            Resource {
                id: "h1".to_string(),
                capacity: CapacityVector::new(10_000, 32 << 30, 0),
                state: ResourceState::Active,
                overcommitted: false,
                workloads: Default::default(),
            },
            Resource {
                id: "h2".to_string(),
                capacity: CapacityVector::new(10_000, 32 << 30, 0),
                state: ResourceState::Active,
                overcommitted: false,
                workloads: Default::default(),
            },
        ];
        let workloads = vec![Workload {
            id: "w1".to_string(),
            demand: CapacityVector::new(4_000, 4 << 30, 0),
            observed_demand: None,
            host: "h1".to_string(),
            constraints: PlacementConstraints::default(),
        }];
        ClusterSnapshot::assemble("test", resources, workloads).unwrap()
    }

    struct FixedStrategy(Vec<ActionDraft>);

    impl Strategy for FixedStrategy {
        fn name(&self) -> &str {
            "fixed"
        }

        fn goal(&self) -> &str {
            "test"
        }

        fn compute(&self, _: &ClusterSnapshot) -> Result<ProposedActions, StrategyError> {
            Ok(ProposedActions {
                drafts: self.0.clone(),
                goal_satisfaction: 1.0,
                ..Default::default()
            })
        }
    }

    #[test]
    fn valid_proposal_passes() {
        let engine = StrategyEngine::new();
        let strategy = FixedStrategy(vec![ActionDraft::migrate(
            "w1",
            "h1",
            "h2",
            &CapacityVector::new(4_000, 4 << 30, 0),
        )]);
        let proposed = engine.run(&strategy, &snapshot()).unwrap();
        assert_eq!(proposed.drafts.len(), 1);
    }

    #[test]
    fn dangling_target_is_rejected() {
        let engine = StrategyEngine::new();
        let strategy = FixedStrategy(vec![ActionDraft::migrate(
            "w9",
            "h1",
            "h2",
            &CapacityVector::default(),
        )]);
        let err = engine.run(&strategy, &snapshot()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Strategy(StrategyError::InvalidProposal(_))
        ));
    }

    #[test]
    fn dangling_migration_host_is_rejected() {
        let engine = StrategyEngine::new();
        let strategy = FixedStrategy(vec![ActionDraft::migrate(
            "w1",
            "h1",
            "h9",
            &CapacityVector::default(),
        )]);
        assert!(engine.run(&strategy, &snapshot()).is_err());
    }

    #[test]
    fn conflicting_kinds_for_one_workload_are_rejected() {
        let engine = StrategyEngine::new();
        let strategy = FixedStrategy(vec![
            ActionDraft::migrate("w1", "h1", "h2", &CapacityVector::default()),
            ActionDraft::resize("w1", "h1", Some(2_000), None),
        ]);
        let err = engine.run(&strategy, &snapshot()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Strategy(StrategyError::InvalidProposal(_))
        ));
    }

    #[test]
    fn same_kind_duplicates_are_allowed() {
        let engine = StrategyEngine::new();
        // Two migrations of the same workload: orderable by submission
        // order at synthesis time, so the engine lets them through.
        let strategy = FixedStrategy(vec![
            ActionDraft::migrate("w1", "h1", "h2", &CapacityVector::default()),
            ActionDraft::migrate("w1", "h2", "h1", &CapacityVector::default()),
        ]);
        assert!(engine.run(&strategy, &snapshot()).is_ok());
    }

    #[test]
    fn strategy_error_propagates() {
        struct Refusing;
        impl Strategy for Refusing {
            fn name(&self) -> &str {
                "refusing"
            }
            fn goal(&self) -> &str {
                "test"
            }
            fn compute(&self, _: &ClusterSnapshot) -> Result<ProposedActions, StrategyError> {
                Err(StrategyError::CannotPlan("insufficient headroom".into()))
            }
        }

        let engine = StrategyEngine::new();
        let err = engine.run(&Refusing, &snapshot()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Strategy(StrategyError::CannotPlan(_))
        ));
    }
}
