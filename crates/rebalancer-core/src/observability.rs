//! Observability infrastructure for the rebalancer engine
//!
//! Prometheus metrics covering audit cycles, plan synthesis, and action
//! execution. Metrics register once into the default registry and the
//! public handle is cheap to clone.

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Histogram buckets for engine phase durations (in seconds).
const PHASE_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    audit_cycles_total: IntCounterVec,
    actions_total: IntCounterVec,
    snapshot_build_seconds: Histogram,
    plan_synthesis_seconds: Histogram,
    plan_execution_seconds: Histogram,
    resources_in_scope: IntGauge,
    workloads_in_scope: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            audit_cycles_total: register_int_counter_vec!(
                "rebalancer_audit_cycles_total",
                "Audit cycles run, by terminal outcome",
                &["outcome"]
            )
            .expect("Failed to register audit_cycles_total"),

            actions_total: register_int_counter_vec!(
                "rebalancer_actions_total",
                "Actions reaching a terminal status, by status",
                &["status"]
            )
            .expect("Failed to register actions_total"),

            snapshot_build_seconds: register_histogram!(
                "rebalancer_snapshot_build_seconds",
                "Time spent assembling a cluster snapshot",
                PHASE_BUCKETS.to_vec()
            )
            .expect("Failed to register snapshot_build_seconds"),

            plan_synthesis_seconds: register_histogram!(
                "rebalancer_plan_synthesis_seconds",
                "Time spent synthesizing an action plan",
                PHASE_BUCKETS.to_vec()
            )
            .expect("Failed to register plan_synthesis_seconds"),

            plan_execution_seconds: register_histogram!(
                "rebalancer_plan_execution_seconds",
                "Time spent executing an action plan",
                PHASE_BUCKETS.to_vec()
            )
            .expect("Failed to register plan_execution_seconds"),

            resources_in_scope: register_int_gauge!(
                "rebalancer_resources_in_scope",
                "Resources in the most recent snapshot"
            )
            .expect("Failed to register resources_in_scope"),

            workloads_in_scope: register_int_gauge!(
                "rebalancer_workloads_in_scope",
                "Workloads in the most recent snapshot"
            )
            .expect("Failed to register workloads_in_scope"),
        }
    }
}

/// Cloneable handle to the process-wide engine metrics.
#[derive(Clone)]
pub struct EngineMetrics;

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self
    }

    fn inner(&self) -> &'static EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_cycle(&self, outcome: &str) {
        self.inner()
            .audit_cycles_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn observe_action(&self, status: &str) {
        self.inner()
            .actions_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn observe_snapshot_build(&self, elapsed: Duration) {
        self.inner()
            .snapshot_build_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_plan_synthesis(&self, elapsed: Duration) {
        self.inner()
            .plan_synthesis_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_plan_execution(&self, elapsed: Duration) {
        self.inner()
            .plan_execution_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_scope_size(&self, resources: usize, workloads: usize) {
        self.inner().resources_in_scope.set(resources as i64);
        self.inner().workloads_in_scope.set(workloads as i64);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
