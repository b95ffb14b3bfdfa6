//! Sharded secondary indices derived from primary records.
//!
//! Ordered indices keep a sorted `key → {ids}` map per bucket; relation
//! indices keep forward and reverse adjacency, each bucketed on the node it is
//! keyed by, so a neighbour lookup reads exactly one shard.

pub mod ordered;
pub mod relation;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use lineage_core::errors::LineageError;
use lineage_core::ids::{bucket_of, ObjectId};
use lineage_core::record::{IndexEntry, RecordKind};
use serde::{Deserialize, Serialize};

pub use ordered::OrderedShard;
pub use relation::{Direction, RelationShard};

/// Address of one index shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShardRef {
    /// Bucket of an ordered index.
    Ordered {
        /// Index name.
        index: String,
        /// Bucket number.
        bucket: u16,
    },
    /// Bucket of one direction of a relation index.
    Relation {
        /// Index name.
        index: String,
        /// Stored direction.
        direction: Direction,
        /// Bucket number.
        bucket: u16,
    },
}

impl ShardRef {
    /// Location relative to the indices directory.
    pub fn location(&self) -> String {
        match self {
            ShardRef::Ordered { index, bucket } => ordered::location(index, *bucket),
            ShardRef::Relation {
                index,
                direction,
                bucket,
            } => relation::location(index, *direction, *bucket),
        }
    }

    /// Record kind of the shard file.
    pub fn kind(&self) -> RecordKind {
        match self {
            ShardRef::Ordered { .. } => RecordKind::OrderedShard,
            ShardRef::Relation { .. } => RecordKind::RelationShard,
        }
    }

    /// Index the shard belongs to.
    pub fn index(&self) -> &str {
        match self {
            ShardRef::Ordered { index, .. } | ShardRef::Relation { index, .. } => index,
        }
    }
}

/// Loaded content of one shard.
#[derive(Debug, Clone, PartialEq)]
pub enum Shard {
    /// Ordered bucket.
    Ordered(OrderedShard),
    /// Relation bucket.
    Relation(RelationShard),
}

impl Shard {
    /// Empty shard for an address.
    pub fn empty(at: &ShardRef) -> Self {
        match at {
            ShardRef::Ordered { index, bucket } => Shard::Ordered(OrderedShard::empty(index, *bucket)),
            ShardRef::Relation {
                index,
                direction,
                bucket,
            } => Shard::Relation(RelationShard::empty(index, *direction, *bucket)),
        }
    }

    /// Every stored `(key, value)` pair; relation keys are the bucketed node.
    pub fn pairs(&self) -> Vec<(String, ObjectId)> {
        match self {
            Shard::Ordered(shard) => shard
                .entries
                .iter()
                .flat_map(|(key, ids)| ids.iter().map(move |id| (key.clone(), id.clone())))
                .collect(),
            Shard::Relation(shard) => shard
                .edges
                .iter()
                .flat_map(|(node, others)| {
                    others.iter().map(move |other| (node.to_string(), other.clone()))
                })
                .collect(),
        }
    }
}

/// Shards loaded during one session plus the set modified since the last commit.
#[derive(Debug, Default)]
pub(crate) struct IndexCache {
    shards: BTreeMap<ShardRef, Shard>,
    dirty: BTreeSet<ShardRef>,
}

impl IndexCache {
    pub(crate) fn shard<F>(&mut self, at: &ShardRef, load: F) -> Result<&mut Shard, LineageError>
    where
        F: FnOnce(&ShardRef) -> Result<Shard, LineageError>,
    {
        match self.shards.entry(at.clone()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => Ok(slot.insert(load(at)?)),
        }
    }

    pub(crate) fn apply<F>(
        &mut self,
        entry: &IndexEntry,
        buckets: u16,
        mut load: F,
    ) -> Result<(), LineageError>
    where
        F: FnMut(&ShardRef) -> Result<Shard, LineageError>,
    {
        match entry {
            IndexEntry::Ordered { index, key, id } => {
                let at = ShardRef::Ordered {
                    index: index.to_string(),
                    bucket: bucket_of(key, buckets),
                };
                if let Shard::Ordered(shard) = self.shard(&at, &mut load)? {
                    if shard.insert(key, id) {
                        self.dirty.insert(at);
                    }
                }
            }
            IndexEntry::Relation { index, left, right } => {
                for (direction, node, other) in [
                    (Direction::Forward, left, right),
                    (Direction::Reverse, right, left),
                ] {
                    let at = ShardRef::Relation {
                        index: index.to_string(),
                        direction,
                        bucket: bucket_of(node.as_str(), buckets),
                    };
                    if let Shard::Relation(shard) = self.shard(&at, &mut load)? {
                        if shard.insert(node, other) {
                            self.dirty.insert(at);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn replace(&mut self, at: ShardRef, shard: Shard) {
        self.dirty.insert(at.clone());
        self.shards.insert(at, shard);
    }

    pub(crate) fn dirty(&self) -> impl Iterator<Item = (&ShardRef, &Shard)> {
        self.dirty
            .iter()
            .filter_map(|at| self.shards.get(at).map(|shard| (at, shard)))
    }

    pub(crate) fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.shards.clear();
        self.dirty.clear();
    }

    pub(crate) fn into_shards(self) -> BTreeMap<ShardRef, Shard> {
        self.shards
    }
}

/// One `(key, value)` pair present on one side of an index comparison only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexDrift {
    /// Shard location.
    pub location: String,
    /// Ordered key, or the bucketed node of a relation shard.
    pub key: String,
    /// Stored id, or the neighbour of a relation shard.
    pub value: ObjectId,
}

/// Outcome of comparing stored indices with those implied by primary records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// Primary records scanned.
    pub records: usize,
    /// Pairs implied by records but not stored.
    pub missing: Vec<IndexDrift>,
    /// Pairs stored but not implied by any record.
    pub unexpected: Vec<IndexDrift>,
}

impl IndexReport {
    /// Whether the stored indices match exactly.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}
