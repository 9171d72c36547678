//! Core engine for the cluster rebalancer
//!
//! This crate provides the decision-and-execution pipeline:
//! - Immutable cluster snapshots built from inventory/metrics collaborators
//! - A pluggable strategy contract with a name-based registry
//! - Dependency-aware action plan synthesis
//! - A plan executor with retry, cancellation, and failure policies
//! - The audit coordinator tying one cycle together

pub mod action;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod model;
pub mod observability;
pub mod plan;
pub mod report;
pub mod sources;
pub mod strategy;

pub use action::{Action, ActionDraft, ActionKind, Condition, ConditionField, ProposedActions, TargetRef};
pub use coordinator::{AuditConfig, AuditCoordinator, ScopeLocks};
pub use error::{DriverError, EngineError, StrategyError};
pub use executor::{
    cancellation, ActionDriver, ActionStatus, CancelHandle, CancelToken, ExecutionRecord,
    ExecutionReport, ExecutorConfig, FailurePolicy, PlanExecutor, PlanState, RetryPolicy,
};
pub use model::{
    CapacityVector, ClusterSnapshot, PlacementConstraints, Resource, ResourceState,
    SnapshotBuilder, SnapshotConfig, Workload,
};
pub use observability::EngineMetrics;
pub use plan::{synthesize, ActionPlan, PLAN_SCHEMA_VERSION};
pub use report::{AuditOutcome, AuditReport, REPORT_SCHEMA_VERSION};
pub use sources::{
    InventorySource, Listing, MetricSample, MetricsSource, ResourceDescriptor, SourceError,
    WorkloadDescriptor,
};
pub use strategy::{
    ConsolidationConfig, NoopStrategy, Strategy, StrategyEngine, StrategyRegistry,
    WorkloadConsolidation,
};
