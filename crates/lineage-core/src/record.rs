//! Persisted record contract shared by the codec, the store and the domain model.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

/// Container for fields a record carries that the current schema does not know.
///
/// Every record flattens this map into its serialized form, so unknown fields
/// survive a decode/encode cycle unchanged.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

/// Kinds of records held by the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// Versioned artifact `(path, checksum)`.
    Entity,
    /// Reusable command template.
    Plan,
    /// Composition of plans.
    Composite,
    /// One recorded execution.
    Activity,
    /// Versioned collection of entities.
    Dataset,
    /// Store root and schema marker.
    Root,
    /// One bucket of an ordered index.
    OrderedShard,
    /// One bucket of one direction of a relation index.
    RelationShard,
}

impl RecordKind {
    /// Kinds that live under `objects/` as primary records.
    pub const PRIMARY: [RecordKind; 5] = [
        RecordKind::Entity,
        RecordKind::Plan,
        RecordKind::Composite,
        RecordKind::Activity,
        RecordKind::Dataset,
    ];

    /// Returns the stable string tag written into records and ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Entity => "entity",
            RecordKind::Plan => "plan",
            RecordKind::Composite => "composite",
            RecordKind::Activity => "activity",
            RecordKind::Dataset => "dataset",
            RecordKind::Root => "root",
            RecordKind::OrderedShard => "ordered-shard",
            RecordKind::RelationShard => "relation-shard",
        }
    }

    /// Parses a tag produced by [`RecordKind::as_str`].
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "entity" => Some(RecordKind::Entity),
            "plan" => Some(RecordKind::Plan),
            "composite" => Some(RecordKind::Composite),
            "activity" => Some(RecordKind::Activity),
            "dataset" => Some(RecordKind::Dataset),
            "root" => Some(RecordKind::Root),
            "ordered-shard" => Some(RecordKind::OrderedShard),
            "relation-shard" => Some(RecordKind::RelationShard),
            _ => None,
        }
    }

    /// Whether records of this kind may never be rewritten with different content.
    pub fn is_append_only(&self) -> bool {
        !matches!(
            self,
            RecordKind::Root | RecordKind::OrderedShard | RecordKind::RelationShard
        )
    }
}

/// Index maintenance emitted by a record when it is stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexEntry {
    /// Adds `id` under `key` in an ordered index.
    Ordered {
        /// Catalog name of the index.
        index: &'static str,
        /// Sort key.
        key: String,
        /// Object stored under the key.
        id: ObjectId,
    },
    /// Adds the edge `left -> right` to a relation index.
    Relation {
        /// Catalog name of the index.
        index: &'static str,
        /// Forward endpoint.
        left: ObjectId,
        /// Reverse endpoint.
        right: ObjectId,
    },
}

/// A typed object the store can persist.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind tag written into the encoded record.
    const KIND: RecordKind;

    /// Identity of the record.
    fn id(&self) -> &ObjectId;

    /// Secondary index entries derived from this record.
    fn index_entries(&self) -> Vec<IndexEntry> {
        Vec::new()
    }
}

/// Shape of a catalogued index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    /// Sorted key to ids mapping.
    Ordered,
    /// Bidirectional adjacency between two object classes.
    Relation,
}

/// Names of the catalogued indices.
pub mod index_names {
    /// Entity path → entity ids.
    pub const ENTITIES_BY_PATH: &str = "entities-by-path";
    /// Plan name → plan versions.
    pub const PLANS_BY_NAME: &str = "plans-by-name";
    /// Composite name → composite versions.
    pub const COMPOSITES_BY_NAME: &str = "composites-by-name";
    /// Dataset name → dataset versions.
    pub const DATASETS_BY_NAME: &str = "datasets-by-name";
    /// `ended_at` timestamp + id → activity.
    pub const ACTIVITIES_BY_TIME: &str = "activities-by-time";
    /// Activity → entities it used.
    pub const USAGE: &str = "usage";
    /// Activity → entities it generated.
    pub const GENERATION: &str = "generation";
    /// Plan → activities executing it.
    pub const PLAN_ACTIVITIES: &str = "plan-activities";
    /// Plan → plans derived from it.
    pub const PLAN_DERIVATION: &str = "plan-derivation";
    /// Composite → child plans and composites.
    pub const COMPOSITE_CHILDREN: &str = "composite-children";
    /// Dataset version → its successor versions.
    pub const DATASET_DERIVATION: &str = "dataset-derivation";
    /// Dataset version → entities it contains.
    pub const DATASET_FILES: &str = "dataset-files";
}

/// Every index the store maintains, in catalog order.
pub const INDEX_CATALOG: [(&str, IndexKind); 12] = [
    (index_names::ENTITIES_BY_PATH, IndexKind::Ordered),
    (index_names::PLANS_BY_NAME, IndexKind::Ordered),
    (index_names::COMPOSITES_BY_NAME, IndexKind::Ordered),
    (index_names::DATASETS_BY_NAME, IndexKind::Ordered),
    (index_names::ACTIVITIES_BY_TIME, IndexKind::Ordered),
    (index_names::USAGE, IndexKind::Relation),
    (index_names::GENERATION, IndexKind::Relation),
    (index_names::PLAN_ACTIVITIES, IndexKind::Relation),
    (index_names::PLAN_DERIVATION, IndexKind::Relation),
    (index_names::COMPOSITE_CHILDREN, IndexKind::Relation),
    (index_names::DATASET_DERIVATION, IndexKind::Relation),
    (index_names::DATASET_FILES, IndexKind::Relation),
];
