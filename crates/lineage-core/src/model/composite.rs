//! Composite plans: named steps wired by parameter links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::ObjectId;
use crate::record::{index_names, ExtraFields, IndexEntry, Record, RecordKind};

/// Named child of a composite plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeStep {
    /// Step name, unique within the composite.
    pub name: String,
    /// Child plan or child composite.
    pub plan: ObjectId,
}

/// Reference to one parameter of one step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParamRef {
    /// Step name within the enclosing composite.
    pub step: String,
    /// Parameter name within that step's plan.
    pub parameter: String,
}

impl ParamRef {
    /// Creates a reference.
    pub fn new(step: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step, self.parameter)
    }
}

/// Binds one source parameter to the sinks that consume its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLink {
    /// Producing side, normally an output.
    pub source: ParamRef,
    /// Consuming sides, normally inputs.
    pub sinks: Vec<ParamRef>,
}

/// Composite-level parameter forwarded to child parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMapping {
    /// Name exposed by the composite.
    pub name: String,
    /// Value used when none is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Child parameters receiving the value.
    pub targets: Vec<ParamRef>,
}

/// Caller-side description of a composite.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositeSpec {
    /// Composite name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered children.
    pub steps: Vec<CompositeStep>,
    /// Data links between children.
    #[serde(default)]
    pub links: Vec<ParameterLink>,
    /// Exposed parameters.
    #[serde(default)]
    pub mappings: Vec<ParameterMapping>,
}

/// A plan made of child plans wired together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositePlan {
    /// Identifier of this version.
    pub id: ObjectId,
    /// Name shared by all versions.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered children.
    pub steps: Vec<CompositeStep>,
    /// Data links between children.
    #[serde(default)]
    pub links: Vec<ParameterLink>,
    /// Exposed parameters.
    #[serde(default)]
    pub mappings: Vec<ParameterMapping>,
    /// Creation time.
    pub date_created: DateTime<Utc>,
    /// Previous version.
    #[serde(default)]
    pub derived_from: Option<ObjectId>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl CompositePlan {
    /// Builds a new composite version from a spec.
    pub fn from_spec(
        spec: CompositeSpec,
        now: DateTime<Utc>,
        derived_from: Option<ObjectId>,
    ) -> Self {
        Self {
            id: ObjectId::generate(RecordKind::Composite),
            name: spec.name,
            description: spec.description,
            steps: spec.steps,
            links: spec.links,
            mappings: spec.mappings,
            date_created: now,
            derived_from,
            extra: ExtraFields::new(),
        }
    }

    /// Finds a step by name.
    pub fn step(&self, name: &str) -> Option<&CompositeStep> {
        self.steps.iter().find(|step| step.name == name)
    }
}

impl Record for CompositePlan {
    const KIND: RecordKind = RecordKind::Composite;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::Ordered {
            index: index_names::COMPOSITES_BY_NAME,
            key: self.name.clone(),
            id: self.id.clone(),
        }];
        entries.extend(self.steps.iter().map(|step| IndexEntry::Relation {
            index: index_names::COMPOSITE_CHILDREN,
            left: self.id.clone(),
            right: step.plan.clone(),
        }));
        if let Some(parent) = &self.derived_from {
            entries.push(IndexEntry::Relation {
                index: index_names::PLAN_DERIVATION,
                left: parent.clone(),
                right: self.id.clone(),
            });
        }
        entries
    }
}
