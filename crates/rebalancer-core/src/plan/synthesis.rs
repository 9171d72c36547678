//! Plan synthesis
//!
//! Turns a validated proposal into a dependency-ordered [`ActionPlan`].
//! Edges are inferred from condition overlap: a writer of a (target, field)
//! pair precedes its readers, and two writers of the same pair are ordered
//! by submission index. Symmetric read/write conflicts also fall back to
//! the submission-order tie-break. A genuine conflict cycle cannot be
//! linearized and surfaces as [`EngineError::UnsatisfiablePlan`].
//!
//! Synthesis is deterministic: the ready set is always drained in
//! submission-index order, so identical input yields an identical plan.

use super::{ActionPlan, PLAN_SCHEMA_VERSION};
use crate::action::{Action, ConditionField, ProposedActions, TargetRef};
use crate::error::EngineError;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

type ConditionKey = (TargetRef, ConditionField);

/// Synthesize a plan for one audit from a strategy's proposal.
///
/// Action and plan ids are derived from `audit_id`, so re-running the same
/// strategy over the same snapshot within one audit produces an
/// indistinguishable plan.
pub fn synthesize(
    audit_id: Uuid,
    scope: &str,
    proposed: &ProposedActions,
) -> Result<ActionPlan, EngineError> {
    let actions: Vec<Action> = proposed
        .drafts
        .iter()
        .enumerate()
        .map(|(index, draft)| Action {
            id: Uuid::new_v5(&audit_id, format!("action-{index}").as_bytes()),
            submission_index: index,
            kind: draft.kind.clone(),
            target: draft.target.clone(),
            preconditions: draft.preconditions.clone(),
            postconditions: draft.postconditions.clone(),
        })
        .collect();

    let edges = infer_edges(&actions);
    let order = toposort(&actions, &edges)?;

    // Re-index actions into topological order and remap the edges.
    let mut position: BTreeMap<usize, usize> = BTreeMap::new();
    for (new, old) in order.iter().enumerate() {
        position.insert(*old, new);
    }
    let actions: Vec<Action> = order.iter().map(|old| actions[*old].clone()).collect();
    let edges: Vec<(usize, usize)> = edges
        .iter()
        .map(|(before, after)| (position[before], position[after]))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let plan = ActionPlan {
        schema_version: PLAN_SCHEMA_VERSION,
        id: Uuid::new_v5(&audit_id, b"plan"),
        audit_id,
        scope: scope.to_string(),
        created_at: Utc::now(),
        actions,
        edges,
    };
    plan.validate()?;

    debug!(
        plan_id = %plan.id,
        actions = plan.len(),
        edges = plan.edges.len(),
        "Plan synthesized"
    );
    Ok(plan)
}

fn condition_keys<'a>(
    conditions: impl Iterator<Item = &'a crate::action::Condition>,
) -> BTreeSet<ConditionKey> {
    conditions
        .map(|c| (c.target.clone(), c.field))
        .collect()
}

/// Infer "must precede" edges between actions, keyed by original index.
fn infer_edges(actions: &[Action]) -> BTreeSet<(usize, usize)> {
    let reads: Vec<BTreeSet<ConditionKey>> = actions
        .iter()
        .map(|a| condition_keys(a.preconditions.iter()))
        .collect();
    let writes: Vec<BTreeSet<ConditionKey>> = actions
        .iter()
        .map(|a| condition_keys(a.postconditions.iter()))
        .collect();

    let mut edges = BTreeSet::new();
    for i in 0..actions.len() {
        for j in (i + 1)..actions.len() {
            let i_feeds_j = !writes[i].is_disjoint(&reads[j]);
            let j_feeds_i = !writes[j].is_disjoint(&reads[i]);
            let write_conflict = !writes[i].is_disjoint(&writes[j]);

            if i_feeds_j && !j_feeds_i {
                edges.insert((i, j));
            } else if j_feeds_i && !i_feeds_j {
                edges.insert((j, i));
            } else if i_feeds_j || write_conflict {
                // Symmetric data flow or a plain write-write conflict:
                // no declared precedence, submission order decides.
                edges.insert((i, j));
            }
        }
    }
    edges
}

/// Kahn's algorithm with a deterministic ready set (lowest submission index
/// first). Returns the topological order or the conflict cycle.
fn toposort(
    actions: &[Action],
    edges: &BTreeSet<(usize, usize)>,
) -> Result<Vec<usize>, EngineError> {
    let n = actions.len();
    let mut indegree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (before, after) in edges {
        indegree[*after] += 1;
        successors[*before].push(*after);
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.iter().next().copied() {
        ready.remove(&next);
        order.push(next);
        for succ in &successors[next] {
            indegree[*succ] -= 1;
            if indegree[*succ] == 0 {
                ready.insert(*succ);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        let placed: BTreeSet<usize> = order.into_iter().collect();
        let cycle: Vec<Uuid> = (0..n)
            .filter(|i| !placed.contains(i))
            .map(|i| actions[i].id)
            .collect();
        Err(EngineError::UnsatisfiablePlan { cycle })
    }
}
