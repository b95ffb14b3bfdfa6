//! Sorted key index shards.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use lineage_core::ids::{bucket_name, ObjectId};
use lineage_core::record::{ExtraFields, Record, RecordKind};
use serde::{Deserialize, Serialize};

/// One bucket of an ordered index: sorted keys, each with a set of ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedShard {
    /// Shard location relative to the indices directory.
    pub id: ObjectId,
    /// Index the shard belongs to.
    pub index: String,
    /// Bucket number.
    pub bucket: u16,
    /// Key to ids mapping.
    #[serde(default)]
    pub entries: BTreeMap<String, BTreeSet<ObjectId>>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl OrderedShard {
    /// Creates an empty shard.
    pub fn empty(index: &str, bucket: u16) -> Self {
        Self {
            id: ObjectId::singleton(&location(index, bucket)),
            index: index.to_string(),
            bucket,
            entries: BTreeMap::new(),
            extra: ExtraFields::new(),
        }
    }

    /// Adds `id` under `key`; returns whether it was new.
    pub fn insert(&mut self, key: &str, id: &ObjectId) -> bool {
        self.entries.entry(key.to_string()).or_default().insert(id.clone())
    }

    /// Ids stored under exactly `key`.
    pub fn get(&self, key: &str) -> impl Iterator<Item = &ObjectId> {
        self.entries.get(key).into_iter().flatten()
    }

    /// Entries with `lo <= key < hi`.
    pub fn range<'a>(
        &'a self,
        lo: &'a str,
        hi: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a ObjectId)> + 'a {
        let (lo, upper) = if hi.is_empty() {
            (lo, Bound::Unbounded)
        } else {
            (lo.min(hi), Bound::Excluded(hi))
        };
        self.entries
            .range::<str, _>((Bound::Included(lo), upper))
            .flat_map(|(key, ids)| ids.iter().map(move |id| (key, id)))
    }

    /// Entries whose key starts with `prefix`.
    pub fn prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a ObjectId)> + 'a {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .flat_map(|(key, ids)| ids.iter().map(move |id| (key, id)))
    }

    /// Number of `(key, id)` pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    /// Whether the shard holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Record for OrderedShard {
    const KIND: RecordKind = RecordKind::OrderedShard;

    fn id(&self) -> &ObjectId {
        &self.id
    }
}

/// Location of an ordered shard: `<index>/<bb>`.
pub fn location(index: &str, bucket: u16) -> String {
    format!("{index}/{}", bucket_name(bucket))
}
