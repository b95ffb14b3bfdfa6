//! The store root record: schema version and index catalog.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lineage_core::ids::ObjectId;
use lineage_core::record::{ExtraFields, IndexKind, Record, RecordKind, INDEX_CATALOG};
use serde::{Deserialize, Serialize};

/// Identifier of the singleton root record.
pub const ROOT_ID: &str = "root";

/// Catalog entry describing one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Ordered or relation.
    pub kind: IndexKind,
    /// Bucket count used for the index.
    pub buckets: u16,
    /// Directory relative to the metadata directory.
    pub location: String,
}

/// Schema marker and index catalog of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootRecord {
    /// Always [`ROOT_ID`].
    pub id: ObjectId,
    /// Schema version of every record in the store.
    pub schema_version: u32,
    /// When the store was initialised.
    pub created_at: DateTime<Utc>,
    /// Bucket count for objects and indices.
    pub shard_buckets: u16,
    /// Index name to descriptor.
    #[serde(default)]
    pub indices: BTreeMap<String, IndexDescriptor>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl RootRecord {
    /// Creates a root at `schema_version` with the full catalog.
    pub fn new(schema_version: u32, shard_buckets: u16, now: DateTime<Utc>) -> Self {
        Self {
            id: ObjectId::singleton(ROOT_ID),
            schema_version,
            created_at: now,
            shard_buckets,
            indices: catalog(shard_buckets),
            extra: ExtraFields::new(),
        }
    }

    /// Kind of a catalogued index.
    pub fn index_kind(&self, name: &str) -> Option<IndexKind> {
        self.indices.get(name).map(|descriptor| descriptor.kind)
    }
}

impl Record for RootRecord {
    const KIND: RecordKind = RecordKind::Root;

    fn id(&self) -> &ObjectId {
        &self.id
    }
}

/// Builds the catalog for every index this build maintains.
pub fn catalog(buckets: u16) -> BTreeMap<String, IndexDescriptor> {
    INDEX_CATALOG
        .iter()
        .map(|(name, kind)| {
            (
                name.to_string(),
                IndexDescriptor {
                    kind: *kind,
                    buckets,
                    location: format!("indices/{name}"),
                },
            )
        })
        .collect()
}
