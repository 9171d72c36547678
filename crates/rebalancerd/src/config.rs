//! Daemon configuration

use anyhow::Result;
use rebalancer_core::{
    AuditConfig, ExecutorConfig, FailurePolicy, RetryPolicy, SnapshotConfig,
};
use serde::Deserialize;
use std::time::Duration;

/// Daemon configuration, read from `REBALANCER_`-prefixed environment
/// variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Cluster scope this daemon audits.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Strategy to run each cycle.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Execute synthesized plans instead of only reporting them.
    #[serde(default)]
    pub auto_apply: bool,

    /// Seconds between audit cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Path to the JSON cluster description served by the file adapter.
    #[serde(default = "default_cluster_file")]
    pub cluster_file: String,

    /// `abort` or `continue`.
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,

    /// Dispatch attempts per action.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout per action dispatch, in seconds.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

fn default_scope() -> String {
    "default".to_string()
}

fn default_strategy() -> String {
    "consolidation".to_string()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_cluster_file() -> String {
    "cluster.json".to_string()
}

fn default_failure_policy() -> String {
    "abort".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_action_timeout_secs() -> u64 {
    60
}

impl DaemonConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("REBALANCER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| DaemonConfig {
            scope: default_scope(),
            strategy: default_strategy(),
            auto_apply: false,
            interval_secs: default_interval_secs(),
            cluster_file: default_cluster_file(),
            failure_policy: default_failure_policy(),
            max_attempts: default_max_attempts(),
            action_timeout_secs: default_action_timeout_secs(),
        }))
    }

    pub fn audit_config(&self) -> AuditConfig {
        let failure_policy = match self.failure_policy.as_str() {
            "continue" => FailurePolicy::Continue,
            _ => FailurePolicy::Abort,
        };
        AuditConfig {
            strategy: self.strategy.clone(),
            scope: self.scope.clone(),
            auto_apply: self.auto_apply,
            interval: Duration::from_secs(self.interval_secs),
            snapshot: SnapshotConfig::default(),
            executor: ExecutorConfig {
                retry: RetryPolicy {
                    max_attempts: self.max_attempts,
                    ..RetryPolicy::default()
                },
                failure_policy,
                action_timeout: Duration::from_secs(self.action_timeout_secs),
            },
        }
    }
}
