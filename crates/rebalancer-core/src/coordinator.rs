//! Audit coordination
//!
//! Drives one optimization cycle end to end: resolve the strategy, build a
//! snapshot, run the strategy engine, synthesize a plan, and either execute
//! it (auto-apply) or report it for external approval. Supports one-shot
//! invocation (also the entry point for externally triggered audits) and a
//! continuous interval loop. Cycles for the same cluster scope are strictly
//! serialized; no two executors ever mutate overlapping resources.

use crate::error::EngineError;
use crate::executor::{ActionDriver, CancelToken, ExecutorConfig, PlanExecutor};
use crate::model::{SnapshotBuilder, SnapshotConfig};
use crate::observability::EngineMetrics;
use crate::plan::synthesize;
use crate::report::{AuditOutcome, AuditReport, REPORT_SCHEMA_VERSION};
use crate::sources::{InventorySource, MetricsSource};
use crate::strategy::{StrategyEngine, StrategyRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for one coordinator.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Registry name of the strategy to run.
    pub strategy: String,
    /// Cluster scope this coordinator audits.
    pub scope: String,
    /// When false, synthesized plans are reported for external approval
    /// instead of being executed.
    pub auto_apply: bool,
    /// Interval between cycles in continuous mode.
    pub interval: Duration,
    pub snapshot: SnapshotConfig,
    pub executor: ExecutorConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            strategy: "consolidation".to_string(),
            scope: "default".to_string(),
            auto_apply: false,
            interval: Duration::from_secs(300),
            snapshot: SnapshotConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Per-scope serialization of audit cycles. Coordinators auditing the same
/// scope must share one instance.
#[derive(Default)]
pub struct ScopeLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held for the duration of one cycle, execution included.
    pub async fn acquire(&self, scope: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inner = self.inner.lock().await;
            inner
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Orchestrates audit cycles for one scope.
pub struct AuditCoordinator {
    registry: Arc<StrategyRegistry>,
    inventory: Arc<dyn InventorySource>,
    telemetry: Arc<dyn MetricsSource>,
    driver: Arc<dyn ActionDriver>,
    config: AuditConfig,
    locks: Arc<ScopeLocks>,
    engine: StrategyEngine,
    metrics: EngineMetrics,
}

impl AuditCoordinator {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        inventory: Arc<dyn InventorySource>,
        telemetry: Arc<dyn MetricsSource>,
        driver: Arc<dyn ActionDriver>,
        config: AuditConfig,
    ) -> Self {
        Self {
            registry,
            inventory,
            telemetry,
            driver,
            config,
            locks: Arc::new(ScopeLocks::new()),
            engine: StrategyEngine::new(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Share scope serialization with other coordinators.
    pub fn with_scope_locks(mut self, locks: Arc<ScopeLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Run a single audit cycle. This is also the entry point for
    /// externally triggered audits. Always terminates with a report; every
    /// failure mode folds into a `failed_to_plan` outcome with the reason
    /// attached.
    pub async fn run_once(&self) -> AuditReport {
        self.run_once_with_cancel(CancelToken::never()).await
    }

    pub async fn run_once_with_cancel(&self, cancel: CancelToken) -> AuditReport {
        let _guard = self.locks.acquire(&self.config.scope).await;

        let audit_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            audit_id = %audit_id,
            scope = %self.config.scope,
            strategy = %self.config.strategy,
            auto_apply = self.config.auto_apply,
            "Audit cycle started"
        );

        let report = match self.cycle(audit_id, cancel).await {
            Ok(report) => report,
            Err(e) => {
                warn!(audit_id = %audit_id, error = %e, "Audit cycle failed to plan");
                AuditReport::failed_to_plan(
                    audit_id,
                    &self.config.scope,
                    &self.config.strategy,
                    e.to_string(),
                    started_at,
                )
            }
        };

        self.metrics.observe_cycle(report.outcome.label());
        info!(
            audit_id = %audit_id,
            outcome = report.outcome.label(),
            reason = %report.reason,
            "Audit cycle finished"
        );
        report
    }

    async fn cycle(
        &self,
        audit_id: Uuid,
        cancel: CancelToken,
    ) -> Result<AuditReport, EngineError> {
        let started_at = Utc::now();
        let strategy = self.registry.resolve(&self.config.strategy)?;

        let build_started = Instant::now();
        let snapshot = SnapshotBuilder::new(self.config.snapshot.clone())
            .build(
                &self.config.scope,
                self.inventory.clone(),
                self.telemetry.clone(),
            )
            .await?;
        self.metrics.observe_snapshot_build(build_started.elapsed());
        self.metrics
            .set_scope_size(snapshot.resource_count(), snapshot.workload_count());

        let proposed = self.engine.run(strategy.as_ref(), &snapshot)?;

        let synthesis_started = Instant::now();
        let plan = synthesize(audit_id, &self.config.scope, &proposed)?;
        self.metrics
            .observe_plan_synthesis(synthesis_started.elapsed());

        if !self.config.auto_apply {
            return Ok(AuditReport {
                schema_version: REPORT_SCHEMA_VERSION,
                audit_id,
                scope: self.config.scope.clone(),
                strategy: self.config.strategy.clone(),
                outcome: AuditOutcome::Completed,
                reason: format!(
                    "plan with {} actions synthesized, awaiting external approval",
                    plan.len()
                ),
                plan: Some(plan),
                records: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            });
        }

        let executor = PlanExecutor::new(self.driver.clone(), self.config.executor.clone());
        let execution = executor.execute(&plan, cancel).await?;

        let succeeded = execution
            .records
            .iter()
            .filter(|r| r.status == crate::executor::ActionStatus::Succeeded)
            .count();
        Ok(AuditReport {
            schema_version: REPORT_SCHEMA_VERSION,
            audit_id,
            scope: self.config.scope.clone(),
            strategy: self.config.strategy.clone(),
            outcome: AuditOutcome::from_plan_state(execution.outcome),
            reason: format!(
                "{succeeded} of {} actions succeeded ({})",
                plan.len(),
                execution.outcome.label()
            ),
            plan: Some(plan),
            records: execution.records,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Continuous mode: repeat cycles on the configured interval until
    /// shutdown. Each cycle is independent; nothing is carried across
    /// cycles except logs and metrics.
    pub async fn run_continuous(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            scope = %self.config.scope,
            interval_secs = self.config.interval.as_secs(),
            "Starting continuous audit loop"
        );

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!(scope = %self.config.scope, "Shutting down audit loop");
                    break;
                }
            }
        }
    }
}
