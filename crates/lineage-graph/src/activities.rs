//! Recording executions as activities.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{Activity, Agent, Entity, EntityRef, PlanSpec};
use lineage_core::record::{index_names, RecordKind};
use lineage_core::ObjectId;
use lineage_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::plans::resolve_plan;

/// One artifact version touched by an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Project-relative path.
    pub path: String,
    /// Content checksum at execution time.
    pub checksum: String,
    /// Whether the artifact is a directory.
    #[serde(default)]
    pub is_directory: bool,
}

impl Artifact {
    /// File artifact.
    pub fn file(path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            checksum: checksum.into(),
            is_directory: false,
        }
    }

    /// Directory artifact.
    pub fn directory(path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            is_directory: true,
            ..Self::file(path, checksum)
        }
    }

    fn to_entity(&self) -> Result<Entity, LineageError> {
        let entity = Entity::new(&self.path, &self.checksum)?;
        Ok(if self.is_directory { entity.directory() } else { entity })
    }
}

/// Everything known about one finished command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Command description resolved into a plan.
    pub plan: PlanSpec,
    /// Values the execution used, by parameter name.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Artifacts read.
    #[serde(default)]
    pub inputs: Vec<Artifact>,
    /// Artifacts written.
    #[serde(default)]
    pub outputs: Vec<Artifact>,
    /// Who ran it; the configured default agent when absent.
    #[serde(default)]
    pub agent: Option<Agent>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Execution of `plan` spanning `started_at..ended_at` with no artifacts yet.
    pub fn new(plan: PlanSpec, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            plan,
            parameters: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            agent: None,
            started_at,
            ended_at,
        }
    }

    /// Adds an input artifact.
    pub fn input(mut self, artifact: Artifact) -> Self {
        self.inputs.push(artifact);
        self
    }

    /// Adds an output artifact.
    pub fn output(mut self, artifact: Artifact) -> Self {
        self.outputs.push(artifact);
        self
    }

    /// Sets a parameter value.
    pub fn value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Sets the agent.
    pub fn by(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }
}

/// Stages the plan, entities and activity of one execution.
///
/// Nothing is staged unless both graph invariants hold: no output already has
/// a producer, and no output is an ancestor of any input.
pub fn record_execution(
    store: &mut ObjectStore,
    record: ExecutionRecord,
    default_agent: &Agent,
    now: DateTime<Utc>,
) -> Result<ObjectId, LineageError> {
    if record.ended_at < record.started_at {
        return Err(LineageError::InvalidInput(
            ErrorInfo::new("ended-before-start", "execution ends before it starts")
                .with_context("started_at", record.started_at.to_rfc3339())
                .with_context("ended_at", record.ended_at.to_rfc3339()),
        ));
    }
    let inputs = existing_or_new(store, &record.inputs)?;
    let outputs = existing_or_new(store, &record.outputs)?;
    check_single_producer(store, &outputs)?;
    check_acyclic(store, &inputs, &outputs)?;

    let plan = resolve_plan(store, &record.plan, now)?;
    let activity = Activity {
        id: ObjectId::generate(RecordKind::Activity),
        plan: plan.id.clone(),
        agent: record.agent.unwrap_or_else(|| default_agent.clone()),
        started_at: record.started_at,
        ended_at: record.ended_at,
        parameters: record.parameters,
        usages: inputs.iter().map(EntityRef::from).collect(),
        generations: outputs.iter().map(EntityRef::from).collect(),
        extra: Default::default(),
    };
    for entity in inputs.into_iter().chain(outputs) {
        store.put(entity)?;
    }
    let id = store.put(activity)?;
    info!(activity = %id, plan = %plan.name, "recorded execution");
    Ok(id)
}

/// Stored entities for the artifacts, or fresh ones when unseen. Duplicates collapse.
fn existing_or_new(store: &ObjectStore, artifacts: &[Artifact]) -> Result<Vec<Entity>, LineageError> {
    let mut seen = BTreeSet::new();
    let mut entities = Vec::new();
    for artifact in artifacts {
        let fresh = artifact.to_entity()?;
        if !seen.insert(fresh.id.clone()) {
            continue;
        }
        entities.push(store.try_get::<Entity>(&fresh.id)?.unwrap_or(fresh));
    }
    Ok(entities)
}

fn check_single_producer(store: &ObjectStore, outputs: &[Entity]) -> Result<(), LineageError> {
    for entity in outputs {
        if let Some(producer) = store.sources(index_names::GENERATION, &entity.id)?.first() {
            return Err(LineageError::Conflict(
                ErrorInfo::new("second-producer", "artifact version already has a generating activity")
                    .with_context("path", &entity.path)
                    .with_context("checksum", &entity.checksum)
                    .with_context("producer", producer),
            ));
        }
    }
    Ok(())
}

/// Walks from the inputs back through their producers looking for an output.
fn check_acyclic(store: &ObjectStore, inputs: &[Entity], outputs: &[Entity]) -> Result<(), LineageError> {
    let targets: BTreeSet<&ObjectId> = outputs.iter().map(|entity| &entity.id).collect();
    let mut visited = BTreeSet::new();
    let mut stack: Vec<ObjectId> = inputs.iter().map(|entity| entity.id.clone()).collect();
    while let Some(entity) = stack.pop() {
        if targets.contains(&entity) {
            let path = outputs
                .iter()
                .find(|output| output.id == entity)
                .map(|output| output.path.clone())
                .unwrap_or_default();
            return Err(LineageError::CyclicComposition(
                ErrorInfo::new("provenance-cycle", "execution would make an output its own ancestor")
                    .with_context("path", path)
                    .with_context("entity", &entity),
            ));
        }
        if !visited.insert(entity.clone()) {
            continue;
        }
        for producer in store.sources(index_names::GENERATION, &entity)? {
            stack.extend(store.targets(index_names::USAGE, &producer)?);
        }
    }
    debug!(inputs = inputs.len(), visited = visited.len(), "acyclicity check passed");
    Ok(())
}
