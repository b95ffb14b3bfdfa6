//! Versioned, named collections of tracked files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::model::activity::Person;
use crate::record::{index_names, ExtraFields, IndexEntry, Record, RecordKind};

/// One file tracked by a dataset version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFile {
    /// Entity holding the file content.
    pub entity: ObjectId,
    /// Project-relative path.
    pub path: String,
    /// When the file joined the dataset.
    pub date_added: DateTime<Utc>,
    /// Remote location the file was imported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Named marker on a dataset version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetTag {
    /// Tag name, unique per dataset.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the tag was created.
    pub date_created: DateTime<Utc>,
}

/// Editable descriptive metadata of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Human title.
    #[serde(default)]
    pub title: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Credited people.
    #[serde(default)]
    pub creators: Vec<Person>,
    /// License identifier.
    #[serde(default)]
    pub license: Option<String>,
    /// Origin URL.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Origin DOI.
    #[serde(default)]
    pub doi: Option<String>,
    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One version of a named collection of entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Identifier of this version.
    pub id: ObjectId,
    /// Dataset name shared by all versions.
    pub name: String,
    /// Descriptive metadata.
    #[serde(flatten)]
    pub metadata: DatasetMetadata,
    /// Tags attached to this version.
    #[serde(default)]
    pub tags: Vec<DatasetTag>,
    /// Files in this version.
    #[serde(default)]
    pub files: Vec<DatasetFile>,
    /// Identifier of the first version.
    pub initial_identifier: ObjectId,
    /// Predecessor version.
    #[serde(default)]
    pub derived_from: Option<ObjectId>,
    /// Creation time of this version.
    pub date_created: DateTime<Utc>,
    /// Set on the version recording removal.
    #[serde(default)]
    pub date_removed: Option<DateTime<Utc>>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Dataset {
    /// Creates the first version of a dataset.
    pub fn new(name: impl Into<String>, metadata: DatasetMetadata, now: DateTime<Utc>) -> Self {
        let id = ObjectId::generate(RecordKind::Dataset);
        Self {
            initial_identifier: id.clone(),
            id,
            name: name.into(),
            metadata,
            tags: Vec::new(),
            files: Vec::new(),
            derived_from: None,
            date_created: now,
            date_removed: None,
            extra: ExtraFields::new(),
        }
    }

    /// Copies this version into a successor with a fresh id.
    pub fn next_version(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.id = ObjectId::generate(RecordKind::Dataset);
        next.derived_from = Some(self.id.clone());
        next.date_created = now;
        next
    }

    /// Whether this version records the dataset's removal.
    pub fn is_removed(&self) -> bool {
        self.date_removed.is_some()
    }

    /// Finds a file by path.
    pub fn file(&self, path: &str) -> Option<&DatasetFile> {
        self.files.iter().find(|file| file.path == path)
    }
}

impl Record for Dataset {
    const KIND: RecordKind = RecordKind::Dataset;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::Ordered {
            index: index_names::DATASETS_BY_NAME,
            key: self.name.clone(),
            id: self.id.clone(),
        }];
        if let Some(parent) = &self.derived_from {
            entries.push(IndexEntry::Relation {
                index: index_names::DATASET_DERIVATION,
                left: parent.clone(),
                right: self.id.clone(),
            });
        }
        entries.extend(self.files.iter().map(|file| IndexEntry::Relation {
            index: index_names::DATASET_FILES,
            left: self.id.clone(),
            right: file.entity.clone(),
        }));
        entries
    }
}
