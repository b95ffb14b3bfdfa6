//! Minimal re-execution plans.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{Activity, Plan};
use lineage_core::paths::normalize_path;
use lineage_core::ObjectId;
use lineage_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{all_activities, generator_of, known_entities, producer_of};
use crate::worktree::WorkingTree;

/// One activity to execute again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerunStep {
    /// Activity being repeated.
    pub activity: ObjectId,
    /// Plan it executed.
    pub plan: ObjectId,
    /// Name of that plan.
    pub plan_name: String,
    /// Inputs whose current checksum differs from the recorded one.
    pub changed_inputs: Vec<String>,
    /// Parameter values of the recorded execution.
    pub parameters: BTreeMap<String, String>,
}

/// Ordered activities whose re-execution refreshes the targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerunPlan {
    /// Steps in execution order.
    pub steps: Vec<RerunStep>,
}

impl RerunPlan {
    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Activity ids in execution order.
    pub fn activities(&self) -> Vec<&ObjectId> {
        self.steps.iter().map(|step| &step.activity).collect()
    }
}

struct Node {
    activity: Activity,
    plan_name: String,
    upstream: BTreeSet<ObjectId>,
}

/// Plans the re-execution needed to refresh `targets`.
///
/// Each target starts from its latest producer. From there the closure
/// follows the activity that generated the exact entity version each input
/// used, so the walk stays on the acyclic entity graph.
pub fn plan_rerun(
    store: &ObjectStore,
    tree: &dyn WorkingTree,
    targets: &[String],
) -> Result<RerunPlan, LineageError> {
    let mut nodes: BTreeMap<ObjectId, Node> = BTreeMap::new();
    let mut pending = Vec::new();
    for target in targets {
        let path = normalize_path(target)?;
        known_entities(store, &path)?;
        if let Some(activity) = producer_of(store, &path)? {
            pending.push(activity);
        }
    }

    while let Some(activity) = pending.pop() {
        if nodes.contains_key(&activity.id) {
            continue;
        }
        let mut upstream = BTreeSet::new();
        for usage in &activity.usages {
            let Some(producer) = generator_of(store, &usage.entity)? else {
                continue;
            };
            if producer.id == activity.id {
                continue;
            }
            upstream.insert(producer.id.clone());
            if !nodes.contains_key(&producer.id) {
                pending.push(producer);
            }
        }
        let plan_name = store.get::<Plan>(&activity.plan)?.name;
        nodes.insert(
            activity.id.clone(),
            Node {
                activity,
                plan_name,
                upstream,
            },
        );
    }

    let order = topological(&nodes)?;
    let mut marked: BTreeSet<ObjectId> = BTreeSet::new();
    let mut steps = Vec::new();
    for id in order {
        let node = &nodes[&id];
        let mut changed_inputs = Vec::new();
        for usage in &node.activity.usages {
            if tree.checksum(&usage.path)?.as_deref() != Some(usage.checksum.as_str()) {
                changed_inputs.push(usage.path.clone());
            }
        }
        let propagated = node.upstream.iter().any(|upstream| marked.contains(upstream));
        if changed_inputs.is_empty() && !propagated {
            continue;
        }
        marked.insert(id.clone());
        steps.push(RerunStep {
            activity: id,
            plan: node.activity.plan.clone(),
            plan_name: node.plan_name.clone(),
            changed_inputs,
            parameters: node.activity.parameters.clone(),
        });
    }
    debug!(closure = nodes.len(), steps = steps.len(), "planned re-run");
    Ok(RerunPlan { steps })
}

/// Plans the re-execution of every stale generated path in the project.
pub fn plan_update_all(store: &ObjectStore, tree: &dyn WorkingTree) -> Result<RerunPlan, LineageError> {
    let targets: BTreeSet<String> = all_activities(store)?
        .into_values()
        .flat_map(|activity| activity.generations.into_iter().map(|generation| generation.path))
        .collect();
    let targets: Vec<String> = targets.into_iter().collect();
    plan_rerun(store, tree, &targets)
}

/// Kahn's algorithm; among ready nodes the earliest `(ended_at, plan name, id)` goes first.
///
/// Fails with `CyclicComposition` when some node can never become ready.
fn topological(nodes: &BTreeMap<ObjectId, Node>) -> Result<Vec<ObjectId>, LineageError> {
    let mut waiting: BTreeMap<&ObjectId, usize> = nodes
        .iter()
        .map(|(id, node)| (id, node.upstream.len()))
        .collect();
    let mut downstream: BTreeMap<&ObjectId, Vec<&ObjectId>> = BTreeMap::new();
    for (id, node) in nodes {
        for upstream in &node.upstream {
            downstream.entry(upstream).or_default().push(id);
        }
    }
    let sort_key = |id: &ObjectId| -> (DateTime<Utc>, String, ObjectId) {
        let node = &nodes[id];
        (node.activity.ended_at, node.plan_name.clone(), id.clone())
    };
    let mut ready: BTreeSet<(DateTime<Utc>, String, ObjectId)> = waiting
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| sort_key(*id))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        let id = next.2;
        if let Some(children) = downstream.get(&id) {
            for child in children {
                if let Some(count) = waiting.get_mut(*child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(sort_key(*child));
                    }
                }
            }
        }
        order.push(id);
    }
    if order.len() < nodes.len() {
        let placed: BTreeSet<&ObjectId> = order.iter().collect();
        let stuck: Vec<&ObjectId> = nodes.keys().filter(|id| !placed.contains(id)).collect();
        let first = stuck.first().map(|id| id.to_string()).unwrap_or_default();
        return Err(LineageError::CyclicComposition(
            ErrorInfo::new("provenance-cycle", "activities depend on each other's outputs")
                .with_context("activity", first)
                .with_context("unordered", stuck.len()),
        ));
    }
    Ok(order)
}
