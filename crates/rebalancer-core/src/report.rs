//! Audit reporting
//!
//! The structured, versioned record one audit cycle leaves behind: the
//! plan (when one was synthesized), the final execution records (when it
//! was applied), and a terminal outcome with a human-readable reason.
//! External persistence, CLI display, and API exposure all consume this
//! shape.

use crate::executor::{ExecutionRecord, PlanState};
use crate::plan::ActionPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Terminal outcome of one audit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Plan synthesized and, when auto-apply was on, fully executed.
    Completed,
    PartiallyFailed,
    Aborted,
    Cancelled,
    /// The cycle never reached execution: snapshot, strategy, or synthesis
    /// failed.
    FailedToPlan,
}

impl AuditOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AuditOutcome::Completed => "completed",
            AuditOutcome::PartiallyFailed => "partially_failed",
            AuditOutcome::Aborted => "aborted",
            AuditOutcome::Cancelled => "cancelled",
            AuditOutcome::FailedToPlan => "failed_to_plan",
        }
    }

    /// Map a finished plan execution to the cycle outcome.
    pub fn from_plan_state(state: PlanState) -> Self {
        match state {
            PlanState::Completed => AuditOutcome::Completed,
            PlanState::PartiallyFailed => AuditOutcome::PartiallyFailed,
            PlanState::Aborted => AuditOutcome::Aborted,
            PlanState::Cancelled => AuditOutcome::Cancelled,
            // A cycle only reports after execution reaches a terminal
            // state; anything else means the plan never ran.
            PlanState::NotStarted | PlanState::InProgress => AuditOutcome::FailedToPlan,
        }
    }
}

/// Full record of one audit cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub schema_version: u32,
    pub audit_id: Uuid,
    pub scope: String,
    pub strategy: String,
    pub outcome: AuditOutcome,
    pub reason: String,
    /// Present whenever synthesis succeeded, even if the plan was not
    /// applied (awaiting external approval).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ActionPlan>,
    /// Empty when the plan was not executed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<ExecutionRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AuditReport {
    /// Shorthand for cycles that never produced a plan.
    pub fn failed_to_plan(
        audit_id: Uuid,
        scope: &str,
        strategy: &str,
        reason: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            audit_id,
            scope: scope.to_string(),
            strategy: strategy.to_string(),
            outcome: AuditOutcome::FailedToPlan,
            reason,
            plan: None,
            records: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}
