use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, TimeZone, Utc};
use lineage_core::config::LineageConfig;
use lineage_core::errors::LineageError;
use lineage_core::model::{Activity, PlanSpec};
use lineage_core::ObjectId;
use lineage_graph::graph::{all_activities, generator_of};
use lineage_graph::{Artifact, ExecutionRecord, Lineage, SnapshotTree, WorkingTree};
use proptest::prelude::*;

const PATHS: usize = 5;

#[derive(Debug, Clone)]
struct Run {
    inputs: Vec<(usize, u8)>,
    output: (usize, u8),
}

fn run_strategy() -> impl Strategy<Value = Run> {
    (
        prop::collection::vec((0..PATHS, 0u8..3), 0..3),
        (0..PATHS, 0u8..3),
    )
        .prop_map(|(inputs, output)| Run { inputs, output })
}

fn path(index: usize) -> String {
    format!("p{index}.dat")
}

fn record(step: usize, run: &Run) -> ExecutionRecord {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(step as i64);
    let name = format!("step-{}", step % 3);
    let mut record = ExecutionRecord::new(PlanSpec::new([name.as_str()]).named(name.as_str()), at, at);
    for (index, version) in &run.inputs {
        record = record.input(Artifact::file(path(*index), format!("c{version}")));
    }
    record.output(Artifact::file(path(run.output.0), format!("c{}", run.output.1)))
}

fn populate(runs: &[Run]) -> (tempfile::TempDir, Lineage) {
    let dir = tempfile::tempdir().unwrap();
    let lineage = Lineage::init(
        dir.path(),
        LineageConfig {
            shard_buckets: 2,
            ..LineageConfig::default()
        },
    )
    .unwrap();
    for (step, run) in runs.iter().enumerate() {
        match lineage.record_execution(record(step, run)) {
            Ok(_) => {}
            Err(LineageError::Conflict(_)) | Err(LineageError::CyclicComposition(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    (dir, lineage)
}

fn activities(lineage: &Lineage) -> BTreeMap<ObjectId, Activity> {
    lineage
        .project()
        .read(|view| all_activities(view.store()))
        .unwrap()
}

/// Entity-level graph: each usage points at each generation of the same activity.
fn has_cycle(activities: &BTreeMap<ObjectId, Activity>) -> bool {
    let mut edges: BTreeMap<&ObjectId, Vec<&ObjectId>> = BTreeMap::new();
    for activity in activities.values() {
        for usage in &activity.usages {
            for generation in &activity.generations {
                edges.entry(&usage.entity).or_default().push(&generation.entity);
            }
        }
    }
    let mut finished = BTreeSet::new();
    let mut on_path = BTreeSet::new();
    fn visit<'a>(
        node: &'a ObjectId,
        edges: &BTreeMap<&'a ObjectId, Vec<&'a ObjectId>>,
        finished: &mut BTreeSet<&'a ObjectId>,
        on_path: &mut BTreeSet<&'a ObjectId>,
    ) -> bool {
        if finished.contains(node) {
            return false;
        }
        if !on_path.insert(node) {
            return true;
        }
        let cyclic = edges
            .get(node)
            .map(|next| next.iter().any(|child| visit(child, edges, finished, on_path)))
            .unwrap_or(false);
        on_path.remove(node);
        finished.insert(node);
        cyclic
    }
    let nodes: Vec<&ObjectId> = edges.keys().copied().collect();
    nodes
        .into_iter()
        .any(|node| visit(node, &edges, &mut finished, &mut on_path))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn recorded_graphs_stay_acyclic(runs in prop::collection::vec(run_strategy(), 1..10)) {
        let (_dir, lineage) = populate(&runs);
        let activities = activities(&lineage);
        prop_assert!(!has_cycle(&activities));
        let mut producers: BTreeMap<&ObjectId, usize> = BTreeMap::new();
        for activity in activities.values() {
            for generation in &activity.generations {
                *producers.entry(&generation.entity).or_default() += 1;
            }
        }
        prop_assert!(producers.values().all(|count| *count == 1));
        prop_assert!(lineage.verify_indices().unwrap().is_clean());
    }

    #[test]
    fn reruns_are_minimal_and_complete(
        runs in prop::collection::vec(run_strategy(), 1..10),
        current in prop::collection::vec(prop::option::of(0u8..3), PATHS),
    ) {
        let (_dir, lineage) = populate(&runs);
        let tree: SnapshotTree = current
            .iter()
            .enumerate()
            .filter_map(|(index, version)| version.map(|v| (path(index), format!("c{v}"))))
            .collect();
        let activities = activities(&lineage);
        let plan = lineage.plan_update_all(&tree).unwrap();

        let mut earlier = BTreeSet::new();
        for step in &plan.steps {
            let activity = &activities[&step.activity];
            let propagated = activity.usages.iter().any(|usage| {
                lineage
                    .project()
                    .read(|view| generator_of(view.store(), &usage.entity))
                    .unwrap()
                    .map_or(false, |producer| earlier.contains(&producer.id))
            });
            prop_assert!(!step.changed_inputs.is_empty() || propagated);
            earlier.insert(step.activity.clone());
        }

        let mut latest_producers = BTreeSet::new();
        for index in 0..PATHS {
            if let Ok(Some(producer)) = lineage.producer_of(&path(index)) {
                let status = lineage.compute_status(&tree, &[path(index)]).unwrap();
                if status[&path(index)].is_stale() {
                    prop_assert!(earlier.contains(&producer.id));
                }
                latest_producers.insert(producer.id);
            }
        }
        for id in latest_producers {
            let activity = &activities[&id];
            let changed = activity.usages.iter().any(|usage| {
                tree.checksum(&usage.path).unwrap().as_deref() != Some(usage.checksum.as_str())
            });
            if changed {
                prop_assert!(earlier.contains(&id));
            }
        }
    }
}
