//! Strategy contract and hosting
//!
//! A strategy turns an immutable cluster snapshot into proposed actions.
//! The engine depends only on the [`Strategy`] trait; concrete strategies
//! are interchangeable variants registered by name at startup and resolved
//! by name once per audit cycle.

mod consolidation;
mod engine;
mod registry;

pub use consolidation::{ConsolidationConfig, WorkloadConsolidation};
pub use engine::StrategyEngine;
pub use registry::StrategyRegistry;

use crate::action::{ActionDraft, ProposedActions, TargetRef};
use crate::error::StrategyError;
use crate::model::ClusterSnapshot;

/// A pluggable optimization strategy.
///
/// `compute` receives a read-only snapshot and must not rely on any state
/// outside it; the same snapshot must always yield the same proposal so
/// plan synthesis stays deterministic.
pub trait Strategy: Send + Sync {
    /// Registry name, unique per process.
    fn name(&self) -> &str;

    /// The optimization objective this strategy pursues, for reporting.
    fn goal(&self) -> &str;

    fn compute(&self, snapshot: &ClusterSnapshot) -> Result<ProposedActions, StrategyError>;
}

/// Strategy that proposes nothing. Useful for wiring checks and as a
/// registry placeholder in dry runs.
#[derive(Debug, Default)]
pub struct NoopStrategy;

impl Strategy for NoopStrategy {
    fn name(&self) -> &str {
        "noop"
    }

    fn goal(&self) -> &str {
        "leave the cluster unchanged"
    }

    fn compute(&self, snapshot: &ClusterSnapshot) -> Result<ProposedActions, StrategyError> {
        let drafts = snapshot
            .resources()
            .next()
            .map(|r| vec![ActionDraft::noop(TargetRef::Resource(r.id.clone()))])
            .unwrap_or_default();
        Ok(ProposedActions {
            drafts,
            goal_satisfaction: 1.0,
            ..Default::default()
        })
    }
}
