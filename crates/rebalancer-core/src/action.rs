//! Actions and strategy proposals
//!
//! An action is an atomic infrastructure change with declared pre- and
//! postconditions. Conditions name the (target, field) pairs an action reads
//! and writes; plan synthesis infers dependency edges from their overlap.

use crate::model::CapacityVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Reference to the entity an action or condition is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Workload(String),
    Resource(String),
}

impl TargetRef {
    pub fn id(&self) -> &str {
        match self {
            TargetRef::Workload(id) | TargetRef::Resource(id) => id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Workload(id) => write!(f, "workload/{id}"),
            TargetRef::Resource(id) => write!(f, "resource/{id}"),
        }
    }
}

/// The aspect of a target a condition reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// Which resource hosts a workload.
    Placement,
    /// A resource's power state.
    PowerState,
    /// A workload's assigned allocation.
    Allocation,
    /// A resource's remaining headroom.
    FreeCapacity,
}

/// A declared pre- or postcondition. Only `(target, field)` participates in
/// dependency inference; `detail` is for operators reading the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub target: TargetRef,
    pub field: ConditionField,
    pub detail: String,
}

impl Condition {
    pub fn new(target: TargetRef, field: ConditionField, detail: impl Into<String>) -> Self {
        Self {
            target,
            field,
            detail: detail.into(),
        }
    }

    fn key(&self) -> (&TargetRef, ConditionField) {
        (&self.target, self.field)
    }

    /// Whether two conditions touch the same (target, field) pair.
    pub fn overlaps(&self, other: &Condition) -> bool {
        self.key() == other.key()
    }
}

/// The change an action performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Migrate {
        source: String,
        destination: String,
    },
    Resize {
        #[serde(skip_serializing_if = "Option::is_none")]
        cpu_millicores: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory_bytes: Option<u64>,
    },
    ChangePowerState {
        powered_on: bool,
    },
    Noop,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Migrate { .. } => "migrate",
            ActionKind::Resize { .. } => "resize",
            ActionKind::ChangePowerState { .. } => "change_power_state",
            ActionKind::Noop => "noop",
        }
    }
}

/// An action as proposed by a strategy, before ids and ordering are
/// assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDraft {
    pub kind: ActionKind,
    pub target: TargetRef,
    pub preconditions: Vec<Condition>,
    pub postconditions: Vec<Condition>,
}

impl ActionDraft {
    /// Migrate a workload between hosts. Conditions capture that the move
    /// consumes headroom on the destination and frees it on the source.
    pub fn migrate(
        workload: &str,
        source: &str,
        destination: &str,
        demand: &CapacityVector,
    ) -> Self {
        let w = TargetRef::Workload(workload.to_string());
        let src = TargetRef::Resource(source.to_string());
        let dst = TargetRef::Resource(destination.to_string());
        Self {
            kind: ActionKind::Migrate {
                source: source.to_string(),
                destination: destination.to_string(),
            },
            target: w.clone(),
            preconditions: vec![
                Condition::new(
                    w.clone(),
                    ConditionField::Placement,
                    format!("{workload} is hosted on {source}"),
                ),
                Condition::new(
                    dst.clone(),
                    ConditionField::FreeCapacity,
                    format!(
                        "{destination} has >= {} millicores and {} bytes free",
                        demand.cpu_millicores, demand.memory_bytes
                    ),
                ),
            ],
            postconditions: vec![
                Condition::new(
                    w,
                    ConditionField::Placement,
                    format!("{workload} is hosted on {destination}"),
                ),
                Condition::new(
                    src,
                    ConditionField::FreeCapacity,
                    format!("{source} regains the workload's demand"),
                ),
                Condition::new(
                    dst,
                    ConditionField::FreeCapacity,
                    format!("{destination} headroom shrinks by the workload's demand"),
                ),
            ],
        }
    }

    /// Resize a workload's allocation in place.
    pub fn resize(workload: &str, host: &str, cpu_millicores: Option<u64>, memory_bytes: Option<u64>) -> Self {
        let w = TargetRef::Workload(workload.to_string());
        let h = TargetRef::Resource(host.to_string());
        Self {
            kind: ActionKind::Resize {
                cpu_millicores,
                memory_bytes,
            },
            target: w.clone(),
            preconditions: vec![Condition::new(
                h.clone(),
                ConditionField::FreeCapacity,
                format!("{host} can absorb the allocation change"),
            )],
            postconditions: vec![
                Condition::new(
                    w,
                    ConditionField::Allocation,
                    format!("{workload} allocation updated"),
                ),
                Condition::new(
                    h,
                    ConditionField::FreeCapacity,
                    format!("{host} headroom reflects the new allocation"),
                ),
            ],
        }
    }

    /// Change a resource's power state. Powering a host down requires it to
    /// be empty, which is what the precondition declares.
    pub fn change_power_state(resource: &str, powered_on: bool) -> Self {
        let r = TargetRef::Resource(resource.to_string());
        let preconditions = if powered_on {
            Vec::new()
        } else {
            vec![Condition::new(
                r.clone(),
                ConditionField::FreeCapacity,
                format!("{resource} hosts no workloads"),
            )]
        };
        Self {
            kind: ActionKind::ChangePowerState { powered_on },
            target: r.clone(),
            preconditions,
            postconditions: vec![Condition::new(
                r,
                ConditionField::PowerState,
                format!(
                    "{resource} is powered {}",
                    if powered_on { "on" } else { "off" }
                ),
            )],
        }
    }

    pub fn noop(target: TargetRef) -> Self {
        Self {
            kind: ActionKind::Noop,
            target,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }
}

/// An action bound into a plan: a draft plus identity and submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    /// Position in the strategy's submission order. The deterministic
    /// tie-break for otherwise-unordered actions.
    pub submission_index: usize,
    pub kind: ActionKind,
    pub target: TargetRef,
    pub preconditions: Vec<Condition>,
    pub postconditions: Vec<Condition>,
}

impl Action {
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind.label(), self.target)
    }
}

/// Output of one strategy computation: drafts in submission order plus the
/// strategy's own assessment of how well the goal is met.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposedActions {
    pub drafts: Vec<ActionDraft>,
    /// 0.0 (goal unmet) to 1.0 (goal fully met after applying the drafts).
    pub goal_satisfaction: f64,
    /// Free-form strategy diagnostics, keyed deterministically.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, String>,
}
