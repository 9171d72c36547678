//! Action plans
//!
//! An ordered sequence of actions plus the dependency edges that ordering
//! must respect. Plans are immutable once handed to the executor; only the
//! per-action execution records change after that point.

mod synthesis;

pub use synthesis::synthesize;

use crate::action::Action;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version stamped into serialized plans and reports.
pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// A dependency-ordered action plan for one audit.
///
/// `actions` is already in a valid topological order; `edges` holds the
/// dependency graph as `(before, after)` positions into `actions`. Every
/// edge points forward, which [`ActionPlan::validate`] re-checks before
/// executor handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub schema_version: u32,
    pub id: Uuid,
    pub audit_id: Uuid,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub actions: Vec<Action>,
    pub edges: Vec<(usize, usize)>,
}

impl ActionPlan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Positions that must complete before `position` may start.
    pub fn predecessors_of(&self, position: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(_, after)| *after == position)
            .map(|(before, _)| *before)
    }

    /// Positions that depend on `position`, directly.
    pub fn dependents_of(&self, position: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(before, _)| *before == position)
            .map(|(_, after)| *after)
    }

    /// Structural validation before executor handoff: edges in bounds,
    /// all pointing forward (which also proves acyclicity of the stored
    /// order), no self-dependencies.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (before, after) in &self.edges {
            if *before >= self.actions.len() || *after >= self.actions.len() {
                return Err(EngineError::InvalidPlan(format!(
                    "edge ({before}, {after}) out of bounds for {} actions",
                    self.actions.len()
                )));
            }
            if before == after {
                return Err(EngineError::InvalidPlan(format!(
                    "action at position {before} depends on itself"
                )));
            }
            if before > after {
                return Err(EngineError::InvalidPlan(format!(
                    "edge ({before}, {after}) violates the stored topological order"
                )));
            }
        }
        Ok(())
    }
}
