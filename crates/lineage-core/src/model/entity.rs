//! File and directory versions identified by path and checksum.

use serde::{Deserialize, Serialize};

use crate::errors::LineageError;
use crate::ids::ObjectId;
use crate::paths::normalize_path;
use crate::record::{index_names, ExtraFields, IndexEntry, Record, RecordKind};

/// A versioned artifact: one file or directory at one checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Identifier derived from `(path, checksum)`.
    pub id: ObjectId,
    /// Project-relative path.
    pub path: String,
    /// Content checksum at the time the entity was recorded.
    pub checksum: String,
    /// Whether the artifact is a directory.
    #[serde(default)]
    pub is_directory: bool,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Entity {
    /// Creates an entity for a file at the given checksum.
    pub fn new(path: &str, checksum: &str) -> Result<Self, LineageError> {
        let path = normalize_path(path)?;
        Ok(Self {
            id: ObjectId::for_entity(&path, checksum),
            path,
            checksum: checksum.to_string(),
            is_directory: false,
            extra: ExtraFields::new(),
        })
    }

    /// Marks the entity as a directory.
    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }
}

impl Record for Entity {
    const KIND: RecordKind = RecordKind::Entity;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::Ordered {
            index: index_names::ENTITIES_BY_PATH,
            key: self.path.clone(),
            id: self.id.clone(),
        }]
    }
}

/// Reference from an activity to the entity it used or generated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Referenced entity.
    pub entity: ObjectId,
    /// Path of the entity, denormalised for traversal without loading it.
    pub path: String,
    /// Checksum recorded at execution time.
    pub checksum: String,
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        Self {
            entity: entity.id.clone(),
            path: entity.path.clone(),
            checksum: entity.checksum.clone(),
        }
    }
}
