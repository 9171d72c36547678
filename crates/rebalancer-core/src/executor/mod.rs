//! Plan execution state machine
//!
//! Walks an action plan in dependency order, dispatching every action whose
//! predecessors have all succeeded. Independent branches of the dependency
//! graph run concurrently; an edge is never violated. Failures are retried
//! under the configured policy; exhausting it makes the action terminally
//! failed and the failure policy decides what happens to the rest of the
//! plan. Succeeded actions are never rolled back automatically; any
//! compensation is a new plan authored by an operator.

mod retry;

pub use retry::RetryPolicy;

use crate::action::Action;
use crate::error::{DriverError, EngineError};
use crate::observability::EngineMetrics;
use crate::plan::ActionPlan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Infrastructure driver collaborator. Implementations must be idempotent
/// or report unambiguous success/failure so retries are safe.
#[async_trait]
pub trait ActionDriver: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<(), DriverError>;
}

/// Per-action runtime status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl ActionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

/// Runtime record for one action, mutated only by the executor owning the
/// plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub action_id: Uuid,
    pub status: ActionStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ExecutionRecord {
    fn new(action_id: Uuid) -> Self {
        Self {
            action_id,
            status: ActionStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }
}

/// Plan-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    NotStarted,
    InProgress,
    Completed,
    PartiallyFailed,
    Aborted,
    Cancelled,
}

impl PlanState {
    pub fn label(&self) -> &'static str {
        match self {
            PlanState::NotStarted => "not_started",
            PlanState::InProgress => "in_progress",
            PlanState::Completed => "completed",
            PlanState::PartiallyFailed => "partially_failed",
            PlanState::Aborted => "aborted",
            PlanState::Cancelled => "cancelled",
        }
    }
}

/// What to do with the rest of the plan after an action is terminally
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching entirely; everything not yet started is skipped.
    Abort,
    /// Skip only the failed action's transitive dependents and keep
    /// executing independent branches.
    Continue,
}

/// Final result of executing one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub plan_id: Uuid,
    pub outcome: PlanState,
    pub records: Vec<ExecutionRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
    /// Timeout per dispatch attempt; exceeding it counts as a failed
    /// attempt.
    pub action_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::Abort,
            action_timeout: Duration::from_secs(60),
        }
    }
}

/// Create a linked cancellation handle/token pair.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelToken {
            rx,
            _keepalive: None,
        },
    )
}

/// Signals cancellation to an executor.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side of a cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    // Keeps the sender alive for tokens that can never fire.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is signalled; pends forever if the handle
    /// was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Executes one [`ActionPlan`] against an [`ActionDriver`].
pub struct PlanExecutor {
    driver: Arc<dyn ActionDriver>,
    config: ExecutorConfig,
    metrics: EngineMetrics,
}

impl PlanExecutor {
    pub fn new(driver: Arc<dyn ActionDriver>, config: ExecutorConfig) -> Self {
        Self {
            driver,
            config,
            metrics: EngineMetrics::new(),
        }
    }

    /// Run the plan to a terminal state. Fails only if the plan itself is
    /// structurally invalid; action failures are reported, not returned.
    pub async fn execute(
        &self,
        plan: &ActionPlan,
        mut cancel: CancelToken,
    ) -> Result<ExecutionReport, EngineError> {
        plan.validate()?;
        let started_at = Utc::now();
        let started = Instant::now();
        let n = plan.len();

        let mut state = PlanState::InProgress;
        info!(plan_id = %plan.id, actions = n, state = state.label(), "Plan execution started");

        let mut records: Vec<ExecutionRecord> =
            plan.actions.iter().map(|a| ExecutionRecord::new(a.id)).collect();

        let mut indegree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (before, after) in &plan.edges {
            indegree[*after] += 1;
            successors[*before].push(*after);
        }

        let mut ready: BTreeSet<usize> =
            (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut in_flight: JoinSet<(usize, u32, Result<(), String>)> = JoinSet::new();
        let mut halted = false;
        let mut cancelled = false;

        loop {
            // A signal raised before or between joins must stop dispatch
            // ahead of the next batch.
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                info!(plan_id = %plan.id, "Cancellation received, stopping dispatch");
            }
            if !halted && !cancelled {
                let dispatch: Vec<usize> = ready.iter().copied().collect();
                ready.clear();
                for position in dispatch {
                    let action = plan.actions[position].clone();
                    records[position].status = ActionStatus::Running;
                    records[position].started_at = Some(Utc::now());
                    debug!(plan_id = %plan.id, action = %action.describe(), "Dispatching action");

                    let driver = self.driver.clone();
                    let retry = self.config.retry.clone();
                    let timeout = self.config.action_timeout;
                    in_flight.spawn(async move {
                        let (attempts, result) =
                            run_attempts(driver, &action, &retry, timeout).await;
                        (position, attempts, result)
                    });
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    let Some(joined) = joined else { break };
                    let (position, attempts, result) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            // A panicking driver is a terminal failure for
                            // whichever action was running; the join error
                            // does not tell us which, so this is fatal.
                            return Err(EngineError::InvalidPlan(format!(
                                "action task panicked: {e}"
                            )));
                        }
                    };

                    let record = &mut records[position];
                    record.attempts = attempts;
                    record.finished_at = Some(Utc::now());

                    match result {
                        Ok(()) => {
                            record.status = ActionStatus::Succeeded;
                            debug!(
                                plan_id = %plan.id,
                                action = %plan.actions[position].describe(),
                                attempts,
                                "Action succeeded"
                            );
                            for succ in &successors[position] {
                                indegree[*succ] -= 1;
                                if indegree[*succ] == 0
                                    && records[*succ].status == ActionStatus::Pending
                                {
                                    ready.insert(*succ);
                                }
                            }
                        }
                        Err(detail) => {
                            record.status = ActionStatus::Failed;
                            record.last_error = Some(detail.clone());
                            warn!(
                                plan_id = %plan.id,
                                action = %plan.actions[position].describe(),
                                attempts,
                                error = %detail,
                                "Action terminally failed"
                            );
                            match self.config.failure_policy {
                                FailurePolicy::Abort => halted = true,
                                FailurePolicy::Continue => {
                                    skip_dependents(position, &successors, &mut records);
                                }
                            }
                        }
                    }
                }
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!(plan_id = %plan.id, "Cancellation received, letting in-flight actions finish");
                }
            }
        }

        // Terminal bookkeeping for everything that never started.
        for record in &mut records {
            if record.status == ActionStatus::Pending {
                record.status = if cancelled {
                    ActionStatus::Cancelled
                } else {
                    ActionStatus::Skipped
                };
                if halted {
                    record.last_error = Some("skipped after earlier failure".to_string());
                }
            }
        }

        state = final_state(&records, cancelled);
        for record in &records {
            self.metrics.observe_action(record.status.label());
        }
        self.metrics.observe_plan_execution(started.elapsed());

        info!(
            plan_id = %plan.id,
            outcome = state.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plan execution finished"
        );

        Ok(ExecutionReport {
            plan_id: plan.id,
            outcome: state,
            records,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Dispatch one action with retries. Returns total attempts and the final
/// result.
async fn run_attempts(
    driver: Arc<dyn ActionDriver>,
    action: &Action,
    retry: &RetryPolicy,
    timeout: Duration,
) -> (u32, Result<(), String>) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(timeout, driver.execute(action)).await;
        let detail = match outcome {
            Ok(Ok(())) => return (attempt, Ok(())),
            Ok(Err(e)) => e.to_string(),
            Err(_) => DriverError::Timeout.to_string(),
        };
        if attempt >= retry.max_attempts {
            return (attempt, Err(detail));
        }
        let backoff = retry.backoff_after(attempt);
        warn!(
            action = %action.describe(),
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %detail,
            "Action attempt failed, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Mark the transitive dependents of a failed action as skipped.
fn skip_dependents(
    failed: usize,
    successors: &[Vec<usize>],
    records: &mut [ExecutionRecord],
) {
    let mut stack: Vec<usize> = successors[failed].clone();
    while let Some(position) = stack.pop() {
        // A dependent can only have started if its predecessor succeeded,
        // so anything reachable here is still pending (or already marked).
        if records[position].status == ActionStatus::Pending {
            records[position].status = ActionStatus::Skipped;
            records[position].last_error =
                Some("skipped: a dependency terminally failed".to_string());
            stack.extend_from_slice(&successors[position]);
        }
    }
}

fn final_state(records: &[ExecutionRecord], cancelled: bool) -> PlanState {
    if cancelled
        && records
            .iter()
            .any(|r| r.status == ActionStatus::Cancelled)
    {
        return PlanState::Cancelled;
    }
    let any_failed_or_skipped = records.iter().any(|r| {
        matches!(r.status, ActionStatus::Failed | ActionStatus::Skipped)
    });
    if any_failed_or_skipped {
        if records.iter().any(|r| r.status == ActionStatus::Succeeded) {
            PlanState::PartiallyFailed
        } else {
            PlanState::Aborted
        }
    } else {
        PlanState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionDraft, ProposedActions};
    use crate::model::CapacityVector;
    use crate::plan::synthesize;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Driver that records dispatch order and fails configured targets a
    /// given number of times (u32::MAX = always).
    struct ScriptedDriver {
        order: Mutex<Vec<String>>,
        failures: Mutex<HashMap<String, u32>>,
        delay: Duration,
    }

    impl ScriptedDriver {
        fn new() -> Self {
            Self {
                order: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
            }
        }

        fn failing(target: &str, times: u32) -> Self {
            let driver = Self::new();
            driver
                .failures
                .lock()
                .unwrap()
                .insert(target.to_string(), times);
            driver
        }

        fn dispatched(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionDriver for ScriptedDriver {
        async fn execute(&self, action: &Action) -> Result<(), DriverError> {
            self.order
                .lock()
                .unwrap()
                .push(action.target.id().to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(action.target.id()) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(DriverError::Failed("scripted failure".to_string()));
                }
            }
            Ok(())
        }
    }

    fn fast_config(failure_policy: FailurePolicy) -> ExecutorConfig {
        ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                multiplier: 1.0,
                max_backoff: Duration::from_millis(1),
            },
            failure_policy,
            action_timeout: Duration::from_secs(5),
        }
    }

    fn audit_id() -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, b"executor-tests")
    }

    /// Chain: migrate w1 off h2, then power h2 down.
    fn chained_plan() -> ActionPlan {
        let proposed = ProposedActions {
            drafts: vec![
                ActionDraft::migrate("w1", "h2", "h1", &CapacityVector::new(1_000, 0, 0)),
                ActionDraft::change_power_state("h2", false),
            ],
            goal_satisfaction: 1.0,
            ..Default::default()
        };
        synthesize(audit_id(), "test", &proposed).unwrap()
    }

    /// Two independent migrations.
    fn parallel_plan() -> ActionPlan {
        let proposed = ProposedActions {
            drafts: vec![
                ActionDraft::migrate("w1", "h1", "h2", &CapacityVector::default()),
                ActionDraft::migrate("w2", "h3", "h4", &CapacityVector::default()),
            ],
            goal_satisfaction: 1.0,
            ..Default::default()
        };
        synthesize(audit_id(), "test", &proposed).unwrap()
    }

    #[tokio::test]
    async fn plan_completes_in_dependency_order() {
        let driver = Arc::new(ScriptedDriver::new());
        let executor = PlanExecutor::new(driver.clone(), fast_config(FailurePolicy::Abort));

        let report = executor
            .execute(&chained_plan(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.outcome, PlanState::Completed);
        assert!(report
            .records
            .iter()
            .all(|r| r.status == ActionStatus::Succeeded));
        // The migration must have been dispatched before the power-down.
        assert_eq!(driver.dispatched(), vec!["w1", "h2"]);
    }

    #[tokio::test]
    async fn retry_recovers_transient_failure() {
        let driver = Arc::new(ScriptedDriver::failing("w1", 1));
        let executor = PlanExecutor::new(driver, fast_config(FailurePolicy::Abort));

        let report = executor
            .execute(&chained_plan(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.outcome, PlanState::Completed);
        assert_eq!(report.records[0].attempts, 2);
    }

    #[tokio::test]
    async fn retry_exhaustion_is_terminal_and_bounded() {
        let driver = Arc::new(ScriptedDriver::failing("w1", u32::MAX));
        let executor = PlanExecutor::new(driver, fast_config(FailurePolicy::Abort));

        let report = executor
            .execute(&chained_plan(), CancelToken::never())
            .await
            .unwrap();

        let failed = &report.records[0];
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert!(failed.last_error.as_deref().unwrap().contains("scripted"));
    }

    #[tokio::test]
    async fn abort_policy_first_action_failure_aborts_plan() {
        let driver = Arc::new(ScriptedDriver::failing("w1", u32::MAX));
        let executor = PlanExecutor::new(driver, fast_config(FailurePolicy::Abort));

        let report = executor
            .execute(&chained_plan(), CancelToken::never())
            .await
            .unwrap();

        // Nothing succeeded before the failure, so the plan is aborted and
        // the dependent is skipped.
        assert_eq!(report.outcome, PlanState::Aborted);
        assert_eq!(report.records[1].status, ActionStatus::Skipped);
    }

    #[tokio::test]
    async fn abort_policy_after_success_is_partially_failed() {
        // w1 succeeds on its branch; w2 fails; under abort the plan is
        // partially failed.
        let driver = Arc::new(ScriptedDriver::failing("w2", u32::MAX));
        let executor = PlanExecutor::new(driver, fast_config(FailurePolicy::Abort));

        let report = executor
            .execute(&parallel_plan(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.outcome, PlanState::PartiallyFailed);
        assert_eq!(report.records[0].status, ActionStatus::Succeeded);
        assert_eq!(report.records[1].status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn continue_policy_skips_only_dependents() {
        // Plan: (w1 -> power h2) plus an independent migration of w2.
        let proposed = ProposedActions {
            drafts: vec![
                ActionDraft::migrate("w1", "h2", "h1", &CapacityVector::default()),
                ActionDraft::change_power_state("h2", false),
                ActionDraft::migrate("w2", "h3", "h4", &CapacityVector::default()),
            ],
            goal_satisfaction: 1.0,
            ..Default::default()
        };
        let plan = synthesize(audit_id(), "test", &proposed).unwrap();

        let driver = Arc::new(ScriptedDriver::failing("w1", u32::MAX));
        let executor = PlanExecutor::new(driver, fast_config(FailurePolicy::Continue));

        let report = executor.execute(&plan, CancelToken::never()).await.unwrap();

        assert_eq!(report.outcome, PlanState::PartiallyFailed);
        let by_id: HashMap<Uuid, ActionStatus> = report
            .records
            .iter()
            .map(|r| (r.action_id, r.status))
            .collect();
        for (position, action) in plan.actions.iter().enumerate() {
            let status = by_id[&action.id];
            match action.target.id() {
                "w1" => assert_eq!(status, ActionStatus::Failed),
                "h2" => assert_eq!(status, ActionStatus::Skipped),
                "w2" => assert_eq!(status, ActionStatus::Succeeded),
                other => panic!("unexpected target {other} at {position}"),
            }
        }
    }

    #[tokio::test]
    async fn dispatch_timeout_counts_as_failed_attempt() {
        struct StallingDriver;

        #[async_trait]
        impl ActionDriver for StallingDriver {
            async fn execute(&self, _: &Action) -> Result<(), DriverError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let mut config = fast_config(FailurePolicy::Abort);
        config.action_timeout = Duration::from_millis(10);
        let executor = PlanExecutor::new(Arc::new(StallingDriver), config);

        let report = executor
            .execute(&chained_plan(), CancelToken::never())
            .await
            .unwrap();

        let failed = &report.records[0];
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert!(failed.last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_lets_running_actions_finish() {
        let mut driver = ScriptedDriver::new();
        driver.delay = Duration::from_millis(50);
        let driver = Arc::new(driver);
        let executor = Arc::new(PlanExecutor::new(
            driver.clone(),
            fast_config(FailurePolicy::Abort),
        ));

        let (handle, token) = cancellation();
        let plan = chained_plan();
        let task = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&plan, token).await })
        };

        // Cancel while the migration is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.outcome, PlanState::Cancelled);
        // The in-flight migration completed; the power-down never started.
        assert_eq!(report.records[0].status, ActionStatus::Succeeded);
        assert_eq!(report.records[1].status, ActionStatus::Cancelled);
        assert_eq!(driver.dispatched(), vec!["w1"]);
    }

    #[tokio::test]
    async fn cancellation_before_start_cancels_everything() {
        let (handle, token) = cancellation();
        handle.cancel();

        let driver = Arc::new(ScriptedDriver::new());
        let executor = PlanExecutor::new(driver.clone(), fast_config(FailurePolicy::Abort));
        let report = executor.execute(&chained_plan(), token).await.unwrap();

        assert_eq!(report.outcome, PlanState::Cancelled);
        assert!(driver.dispatched().is_empty());
        assert!(report
            .records
            .iter()
            .all(|r| r.status == ActionStatus::Cancelled));
    }

    #[tokio::test]
    async fn empty_plan_completes() {
        let plan = synthesize(audit_id(), "test", &ProposedActions::default()).unwrap();
        let executor = PlanExecutor::new(
            Arc::new(ScriptedDriver::new()),
            fast_config(FailurePolicy::Abort),
        );
        let report = executor.execute(&plan, CancelToken::never()).await.unwrap();
        assert_eq!(report.outcome, PlanState::Completed);
    }
}
