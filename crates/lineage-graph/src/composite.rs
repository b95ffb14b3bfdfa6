//! Composite plans: creation, versioning and expansion into ordered leaf steps.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{CompositePlan, CompositeSpec, ParamRef, ParameterKind, Plan};
use lineage_core::record::{index_names, RecordKind};
use lineage_core::ObjectId;
use lineage_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One plan step of an expanded composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedStep {
    /// Step name qualified by its enclosing composites (`outer.inner`).
    pub name: String,
    /// Plan the step runs.
    pub plan: Plan,
    /// Parameter values after defaults, mappings and links are applied.
    pub values: BTreeMap<String, String>,
}

/// A composite flattened into plan steps in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedWorkflow {
    /// Composite that was expanded.
    pub composite: ObjectId,
    /// Its name.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<ExpandedStep>,
    /// `(from, to)` step dependencies implied by links.
    pub edges: BTreeSet<(String, String)>,
}

impl ExpandedWorkflow {
    /// Finds a step by qualified name.
    pub fn step(&self, name: &str) -> Option<&ExpandedStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Qualified step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }
}

type Slot = (String, String);

struct Binding {
    source: Slot,
    sink: Slot,
}

struct Leaf {
    name: String,
    plan: Plan,
}

struct Expander<'a> {
    store: &'a ObjectStore,
    leaves: Vec<Leaf>,
    bindings: Vec<Binding>,
    mapped: Vec<(Slot, String)>,
    stack: Vec<ObjectId>,
}

/// Expands `composite` against the plans and composites in `store`.
///
/// Fails with `UnresolvedLink` when a link or mapping names a missing step or
/// parameter, or when one step's input default equals another step's output
/// default with no link between them. Fails with `CyclicComposition` when
/// nesting or links form a cycle.
pub fn expand(store: &ObjectStore, composite: &CompositePlan) -> Result<ExpandedWorkflow, LineageError> {
    let mut expander = Expander {
        store,
        leaves: Vec::new(),
        bindings: Vec::new(),
        mapped: Vec::new(),
        stack: Vec::new(),
    };
    expander.visit(composite, "")?;
    let Expander {
        leaves,
        bindings,
        mapped,
        ..
    } = expander;

    let mut values: Vec<BTreeMap<String, String>> = leaves
        .iter()
        .map(|leaf| {
            leaf.plan
                .all_parameters()
                .filter_map(|(_, parameter)| {
                    parameter
                        .default_value
                        .clone()
                        .map(|value| (parameter.name.clone(), value))
                })
                .collect()
        })
        .collect();
    let position: BTreeMap<&str, usize> = leaves
        .iter()
        .enumerate()
        .map(|(index, leaf)| (leaf.name.as_str(), index))
        .collect();
    for ((step, parameter), value) in &mapped {
        values[position[step.as_str()]].insert(parameter.clone(), value.clone());
    }

    check_implicit_links(&leaves, &values, &bindings)?;
    let order = link_order(&leaves, &position, &bindings)?;

    for &index in &order {
        for binding in bindings.iter().filter(|b| position[b.sink.0.as_str()] == index) {
            let source = position[binding.source.0.as_str()];
            if let Some(value) = values[source].get(&binding.source.1).cloned() {
                values[index].insert(binding.sink.1.clone(), value);
            }
        }
    }

    let edges = bindings
        .iter()
        .map(|binding| (binding.source.0.clone(), binding.sink.0.clone()))
        .collect();
    let mut leaves: Vec<Option<Leaf>> = leaves.into_iter().map(Some).collect();
    let mut steps = Vec::with_capacity(order.len());
    for index in order {
        if let Some(leaf) = leaves[index].take() {
            steps.push(ExpandedStep {
                name: leaf.name,
                plan: leaf.plan,
                values: std::mem::take(&mut values[index]),
            });
        }
    }
    debug!(composite = %composite.id, steps = steps.len(), "expanded composite");
    Ok(ExpandedWorkflow {
        composite: composite.id.clone(),
        name: composite.name.clone(),
        steps,
        edges,
    })
}

impl Expander<'_> {
    fn visit(&mut self, composite: &CompositePlan, prefix: &str) -> Result<(), LineageError> {
        if self.stack.contains(&composite.id) {
            return Err(LineageError::CyclicComposition(
                ErrorInfo::new("nested-cycle", "composite contains itself")
                    .with_context("composite", &composite.id)
                    .with_context("name", &composite.name),
            ));
        }
        self.stack.push(composite.id.clone());

        let mut names = BTreeSet::new();
        for step in &composite.steps {
            if !names.insert(step.name.as_str()) {
                return Err(LineageError::InvalidInput(
                    ErrorInfo::new("duplicate-step", "step names must be unique within a composite")
                        .with_context("composite", &composite.name)
                        .with_context("step", &step.name),
                ));
            }
            let qualified = format!("{prefix}{}", step.name);
            match child(self.store, composite, &step.name, &step.plan)? {
                Child::Plan(plan) => self.leaves.push(Leaf {
                    name: qualified,
                    plan,
                }),
                Child::Composite(inner) => self.visit(&inner, &format!("{qualified}."))?,
            }
        }

        for link in &composite.links {
            let sources = resolve(self.store, composite, &link.source, prefix)?;
            for sink in &link.sinks {
                for target in resolve(self.store, composite, sink, prefix)? {
                    for source in &sources {
                        if source.0 == target.0 {
                            return Err(LineageError::CyclicComposition(
                                ErrorInfo::new("self-link", "link connects a step to itself")
                                    .with_context("composite", &composite.name)
                                    .with_context("step", &source.0),
                            ));
                        }
                        self.bindings.push(Binding {
                            source: source.clone(),
                            sink: target.clone(),
                        });
                    }
                }
            }
        }

        for mapping in &composite.mappings {
            let mut targets = Vec::new();
            for target in &mapping.targets {
                targets.extend(resolve(self.store, composite, target, prefix)?);
            }
            if let Some(value) = &mapping.default_value {
                self.mapped
                    .extend(targets.into_iter().map(|slot| (slot, value.clone())));
            }
        }

        self.stack.pop();
        Ok(())
    }
}

enum Child {
    Plan(Plan),
    Composite(CompositePlan),
}

fn child(
    store: &ObjectStore,
    parent: &CompositePlan,
    step: &str,
    id: &ObjectId,
) -> Result<Child, LineageError> {
    let missing = || {
        LineageError::UnresolvedLink(
            ErrorInfo::new("missing-child", "step refers to an unknown plan")
                .with_context("composite", &parent.name)
                .with_context("step", step)
                .with_context("child", id),
        )
    };
    match id.kind() {
        Some(RecordKind::Plan) => store.try_get::<Plan>(id)?.map(Child::Plan).ok_or_else(missing),
        Some(RecordKind::Composite) => store
            .try_get::<CompositePlan>(id)?
            .map(Child::Composite)
            .ok_or_else(missing),
        _ => Err(missing()),
    }
}

/// Resolves a reference to the leaf slots it denotes. References into a
/// nested composite go through that composite's mappings.
fn resolve(
    store: &ObjectStore,
    composite: &CompositePlan,
    reference: &ParamRef,
    prefix: &str,
) -> Result<Vec<Slot>, LineageError> {
    let unresolved = |code: &str, message: &str| {
        LineageError::UnresolvedLink(
            ErrorInfo::new(code, message)
                .with_context("composite", &composite.name)
                .with_context("reference", reference),
        )
    };
    let step = composite
        .step(&reference.step)
        .ok_or_else(|| unresolved("missing-step", "reference names an unknown step"))?;
    let qualified = format!("{prefix}{}", step.name);
    match child(store, composite, &step.name, &step.plan)? {
        Child::Plan(plan) => match plan.find_parameter(&reference.parameter) {
            Some(_) => Ok(vec![(qualified, reference.parameter.clone())]),
            None => Err(unresolved("missing-parameter", "step has no such parameter")),
        },
        Child::Composite(inner) => {
            let mapping = inner
                .mappings
                .iter()
                .find(|mapping| mapping.name == reference.parameter)
                .ok_or_else(|| unresolved("missing-parameter", "nested composite has no such mapping"))?;
            let mut slots = Vec::new();
            for target in &mapping.targets {
                slots.extend(resolve(store, &inner, target, &format!("{qualified}."))?);
            }
            Ok(slots)
        }
    }
}

/// Rejects a step reading a default path another step writes when no link says so.
fn check_implicit_links(
    leaves: &[Leaf],
    values: &[BTreeMap<String, String>],
    bindings: &[Binding],
) -> Result<(), LineageError> {
    let covered: BTreeSet<(&Slot, &Slot)> = bindings
        .iter()
        .map(|binding| (&binding.source, &binding.sink))
        .collect();
    for (consumer_index, consumer) in leaves.iter().enumerate() {
        for (kind, input) in consumer.plan.all_parameters() {
            if kind != ParameterKind::Input {
                continue;
            }
            let Some(path) = values[consumer_index].get(&input.name) else {
                continue;
            };
            for (producer_index, producer) in leaves.iter().enumerate() {
                if producer_index == consumer_index {
                    continue;
                }
                for (kind, output) in producer.plan.all_parameters() {
                    if kind != ParameterKind::Output
                        || values[producer_index].get(&output.name) != Some(path)
                    {
                        continue;
                    }
                    let source = (producer.name.clone(), output.name.clone());
                    let sink = (consumer.name.clone(), input.name.clone());
                    if !covered.contains(&(&source, &sink)) {
                        return Err(LineageError::UnresolvedLink(
                            ErrorInfo::new("implicit-dependency", "step reads a path another step writes without a link")
                                .with_context("path", path)
                                .with_context("producer", ParamRef::new(&producer.name, &output.name))
                                .with_context("consumer", ParamRef::new(&consumer.name, &input.name))
                                .with_hint("add a link from the producing output to the consuming input"),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Orders leaves so every link source runs before its sinks, keeping
/// declaration order among independent steps.
fn link_order(
    leaves: &[Leaf],
    position: &BTreeMap<&str, usize>,
    bindings: &[Binding],
) -> Result<Vec<usize>, LineageError> {
    let mut upstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); leaves.len()];
    for binding in bindings {
        upstream[position[binding.sink.0.as_str()]].insert(position[binding.source.0.as_str()]);
    }
    let mut done = vec![false; leaves.len()];
    let mut order = Vec::with_capacity(leaves.len());
    while order.len() < leaves.len() {
        let next = (0..leaves.len())
            .find(|&index| !done[index] && upstream[index].iter().all(|&up| done[up]));
        let Some(index) = next else {
            let remaining: Vec<&str> = leaves
                .iter()
                .enumerate()
                .filter(|(index, _)| !done[*index])
                .map(|(_, leaf)| leaf.name.as_str())
                .collect();
            return Err(LineageError::CyclicComposition(
                ErrorInfo::new("link-cycle", "links form a cycle")
                    .with_context("steps", remaining.join(",")),
            ));
        };
        done[index] = true;
        order.push(index);
    }
    Ok(order)
}

/// Every stored version of the composite `name`, oldest first.
pub fn composite_versions(store: &ObjectStore, name: &str) -> Result<Vec<CompositePlan>, LineageError> {
    let mut composites = store
        .lookup(index_names::COMPOSITES_BY_NAME, name)?
        .iter()
        .map(|id| store.get::<CompositePlan>(id))
        .collect::<Result<Vec<_>, _>>()?;
    composites.sort_by(|a, b| {
        a.date_created
            .cmp(&b.date_created)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(composites)
}

/// Latest version of the composite `name` that nothing derives from.
pub fn latest_composite(store: &ObjectStore, name: &str) -> Result<CompositePlan, LineageError> {
    let mut latest = None;
    for composite in composite_versions(store, name)? {
        if store.targets(index_names::PLAN_DERIVATION, &composite.id)?.is_empty() {
            latest = Some(composite);
        }
    }
    latest.ok_or_else(|| {
        LineageError::NotFound(
            ErrorInfo::new("unknown-composite", "no composite with this name").with_context("name", name),
        )
    })
}

/// Validates `spec` by expanding it, then stages it as a new version.
///
/// An identical latest version is returned unchanged.
pub fn create_composite(
    store: &mut ObjectStore,
    spec: CompositeSpec,
    now: DateTime<Utc>,
) -> Result<CompositePlan, LineageError> {
    if spec.name.trim().is_empty() {
        return Err(LineageError::InvalidInput(ErrorInfo::new(
            "empty-name",
            "composite needs a name",
        )));
    }
    if spec.steps.is_empty() {
        return Err(LineageError::InvalidInput(
            ErrorInfo::new("empty-composite", "composite needs at least one step")
                .with_context("name", &spec.name),
        ));
    }
    if let Some(step) = spec
        .steps
        .iter()
        .find(|step| step.name.is_empty() || step.name.contains('.'))
    {
        return Err(LineageError::InvalidInput(
            ErrorInfo::new("invalid-step-name", "step names must be non-empty and free of '.'")
                .with_context("composite", &spec.name)
                .with_context("step", &step.name)
                .with_hint("'.' separates the steps of nested composites"),
        ));
    }
    let previous = match latest_composite(store, &spec.name) {
        Ok(previous) => Some(previous),
        Err(LineageError::NotFound(_)) => None,
        Err(err) => return Err(err),
    };
    if let Some(previous) = &previous {
        let unchanged = previous.description == spec.description
            && previous.steps == spec.steps
            && previous.links == spec.links
            && previous.mappings == spec.mappings;
        if unchanged {
            return Ok(previous.clone());
        }
    }
    let composite = CompositePlan::from_spec(spec, now, previous.map(|previous| previous.id));
    let workflow = expand(store, &composite)?;
    store.put(composite.clone())?;
    info!(
        composite = %composite.id,
        name = %composite.name,
        steps = workflow.steps.len(),
        "created composite"
    );
    Ok(composite)
}
