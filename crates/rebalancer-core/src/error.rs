//! Error taxonomy for the rebalancer engine
//!
//! Transient collaborator failures (snapshot builds, action dispatch) are
//! retried with bounded backoff by the layer that owns the call. Structural
//! errors (duplicate registration, unsatisfiable plans) are never retried
//! and propagate straight to the caller.

use thiserror::Error;
use uuid::Uuid;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A collaborator could not produce data for a snapshot build attempt.
    #[error("{source_kind} data unavailable: {detail}")]
    DataUnavailable {
        source_kind: &'static str,
        detail: String,
    },

    /// No consistent snapshot could be assembled within the retry budget.
    /// Torn or partial snapshots are never returned.
    #[error("could not assemble a consistent cluster snapshot after {attempts} attempts")]
    InconsistentSnapshot { attempts: u32 },

    /// A strategy name was registered twice.
    #[error("strategy already registered: {0}")]
    DuplicateName(String),

    /// No strategy is bound to the requested name.
    #[error("strategy not found: {0}")]
    NotFound(String),

    /// A strategy reported it cannot plan, or returned a malformed proposal.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// Proposed actions contain a precondition/postcondition conflict cycle
    /// and cannot be linearized.
    #[error("proposed actions cannot be linearized, conflict cycle: {cycle:?}")]
    UnsatisfiablePlan { cycle: Vec<Uuid> },

    /// A plan failed validation before executor handoff.
    #[error("invalid action plan: {0}")]
    InvalidPlan(String),
}

/// Errors a strategy can signal, or the engine can raise about a proposal.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The strategy cannot produce a plan for this snapshot, e.g. there is
    /// not enough headroom to satisfy its constraints.
    #[error("strategy cannot produce a plan: {0}")]
    CannotPlan(String),

    /// The returned drafts are structurally unsound (dangling target
    /// references, conflicting action kinds for one workload).
    #[error("structurally invalid proposal: {0}")]
    InvalidProposal(String),
}

/// Errors reported by an action driver while executing a single action.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("action dispatch timed out")]
    Timeout,
}
