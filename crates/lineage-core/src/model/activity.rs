//! Executions of plans and the agents behind them.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::model::entity::EntityRef;
use crate::record::{index_names, ExtraFields, IndexEntry, Record, RecordKind};

/// A human responsible for an activity or credited on a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Display name.
    pub name: String,
    /// Contact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Affiliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl Person {
    /// Creates a person with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            affiliation: None,
        }
    }
}

/// The party responsible for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Agent {
    /// A person ran the command.
    Person(Person),
    /// A program ran the command.
    Software {
        /// Program name.
        name: String,
        /// Program version.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

impl Agent {
    /// Display name of the agent.
    pub fn name(&self) -> &str {
        match self {
            Agent::Person(person) => &person.name,
            Agent::Software { name, .. } => name,
        }
    }
}

/// One recorded execution of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Identifier of the activity.
    pub id: ObjectId,
    /// Plan version that was executed.
    pub plan: ObjectId,
    /// Who ran it.
    pub agent: Agent,
    /// Start of the execution.
    pub started_at: DateTime<Utc>,
    /// End of the execution.
    pub ended_at: DateTime<Utc>,
    /// Resolved parameter values by parameter name.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Entities consumed.
    #[serde(default)]
    pub usages: Vec<EntityRef>,
    /// Entities produced.
    #[serde(default)]
    pub generations: Vec<EntityRef>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Activity {
    /// Key under which the activity is stored in the time index.
    pub fn time_key(&self) -> String {
        time_key(&self.ended_at, &self.id)
    }

    /// Whether the activity generated the given path.
    pub fn generates(&self, path: &str) -> bool {
        self.generations.iter().any(|generation| generation.path == path)
    }
}

/// Formats the `activities-by-time` key: fixed-width RFC 3339 in UTC, then the id.
pub fn time_key(at: &DateTime<Utc>, id: &ObjectId) -> String {
    format!("{}#{}", time_prefix(at), id)
}

/// Fixed-width timestamp prefix used by the time index, suitable for range bounds.
pub fn time_prefix(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Record for Activity {
    const KIND: RecordKind = RecordKind::Activity;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![
            IndexEntry::Ordered {
                index: index_names::ACTIVITIES_BY_TIME,
                key: self.time_key(),
                id: self.id.clone(),
            },
            IndexEntry::Relation {
                index: index_names::PLAN_ACTIVITIES,
                left: self.plan.clone(),
                right: self.id.clone(),
            },
        ];
        entries.extend(self.usages.iter().map(|usage| IndexEntry::Relation {
            index: index_names::USAGE,
            left: self.id.clone(),
            right: usage.entity.clone(),
        }));
        entries.extend(self.generations.iter().map(|generation| IndexEntry::Relation {
            index: index_names::GENERATION,
            left: self.id.clone(),
            right: generation.entity.clone(),
        }));
        entries
    }
}
