//! Adjacency index shards.

use std::collections::{BTreeMap, BTreeSet};

use lineage_core::ids::{bucket_name, ObjectId};
use lineage_core::record::{ExtraFields, Record, RecordKind};
use serde::{Deserialize, Serialize};

/// Side of a relation index a shard stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// `left → {right}`.
    Forward,
    /// `right → {left}`.
    Reverse,
}

impl Direction {
    /// Directory name of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

/// One bucket of one direction of a relation index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationShard {
    /// Shard location relative to the indices directory.
    pub id: ObjectId,
    /// Index the shard belongs to.
    pub index: String,
    /// Stored direction.
    pub direction: Direction,
    /// Bucket number.
    pub bucket: u16,
    /// Adjacency lists keyed by the node the shard is bucketed on.
    #[serde(default)]
    pub edges: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl RelationShard {
    /// Creates an empty shard.
    pub fn empty(index: &str, direction: Direction, bucket: u16) -> Self {
        Self {
            id: ObjectId::singleton(&location(index, direction, bucket)),
            index: index.to_string(),
            direction,
            bucket,
            edges: BTreeMap::new(),
            extra: ExtraFields::new(),
        }
    }

    /// Adds `node → other`; returns whether it was new.
    pub fn insert(&mut self, node: &ObjectId, other: &ObjectId) -> bool {
        self.edges.entry(node.clone()).or_default().insert(other.clone())
    }

    /// Neighbours of `node` in this direction.
    pub fn neighbours(&self, node: &ObjectId) -> impl Iterator<Item = &ObjectId> {
        self.edges.get(node).into_iter().flatten()
    }

    /// Number of stored edges.
    pub fn len(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Whether the shard holds nothing.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Record for RelationShard {
    const KIND: RecordKind = RecordKind::RelationShard;

    fn id(&self) -> &ObjectId {
        &self.id
    }
}

/// Location of a relation shard: `<index>/<direction>/<bb>`.
pub fn location(index: &str, direction: Direction, bucket: u16) -> String {
    format!("{index}/{}/{}", direction.as_str(), bucket_name(bucket))
}
