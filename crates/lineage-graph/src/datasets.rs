//! Versioned datasets. Every mutation stages a successor version.

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{Dataset, DatasetFile, DatasetMetadata, DatasetTag, Entity};
use lineage_core::paths::normalize_path;
use lineage_core::record::index_names;
use lineage_store::ObjectStore;
use tracing::{debug, info};

use crate::worktree::WorkingTree;

fn unknown_dataset(name: &str) -> LineageError {
    LineageError::NotFound(
        ErrorInfo::new("unknown-dataset", "no dataset with this name").with_context("name", name),
    )
}

/// Version of `name` with no successor, removed or not.
fn head(store: &ObjectStore, name: &str) -> Result<Option<Dataset>, LineageError> {
    let mut head: Option<Dataset> = None;
    for id in store.lookup(index_names::DATASETS_BY_NAME, name)? {
        if !store.targets(index_names::DATASET_DERIVATION, &id)?.is_empty() {
            continue;
        }
        let candidate = store.get::<Dataset>(&id)?;
        let newer = head.as_ref().map_or(true, |current| {
            (candidate.date_created, !candidate.is_removed(), &candidate.id)
                > (current.date_created, !current.is_removed(), &current.id)
        });
        if newer {
            head = Some(candidate);
        }
    }
    Ok(head)
}

/// Latest live version of `name`.
pub fn dataset(store: &ObjectStore, name: &str) -> Result<Dataset, LineageError> {
    match head(store, name)? {
        Some(dataset) if !dataset.is_removed() => Ok(dataset),
        Some(dataset) => Err(LineageError::NotFound(
            ErrorInfo::new("dataset-removed", "dataset has been removed")
                .with_context("name", name)
                .with_context("version", &dataset.id),
        )),
        None => Err(unknown_dataset(name)),
    }
}

/// Versions of `name` from the latest back to the first, following `derived_from`.
pub fn dataset_history(store: &ObjectStore, name: &str) -> Result<Vec<Dataset>, LineageError> {
    let mut history = Vec::new();
    let mut next = head(store, name)?;
    if next.is_none() {
        return Err(unknown_dataset(name));
    }
    while let Some(version) = next {
        next = match &version.derived_from {
            Some(parent) => Some(store.get::<Dataset>(parent)?),
            None => None,
        };
        history.push(version);
    }
    Ok(history)
}

/// Stages the first version of a new dataset.
pub fn create_dataset(
    store: &mut ObjectStore,
    name: &str,
    metadata: DatasetMetadata,
    now: DateTime<Utc>,
) -> Result<Dataset, LineageError> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(LineageError::InvalidInput(
            ErrorInfo::new("invalid-dataset-name", "dataset names must be non-empty and contain no '/'")
                .with_context("name", name),
        ));
    }
    if let Some(existing) = head(store, name)? {
        if !existing.is_removed() {
            return Err(LineageError::Conflict(
                ErrorInfo::new("dataset-exists", "a dataset with this name already exists")
                    .with_context("name", name)
                    .with_context("version", &existing.id),
            ));
        }
    }
    let dataset = Dataset::new(name, metadata, now);
    store.put(dataset.clone())?;
    info!(dataset = %dataset.id, name, "created dataset");
    Ok(dataset)
}

/// Adds or refreshes files at their current checksums.
///
/// Returns the latest version unchanged when every file is already present
/// at its current checksum.
pub fn add_dataset_files(
    store: &mut ObjectStore,
    tree: &dyn WorkingTree,
    name: &str,
    paths: &[String],
    source: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Dataset, LineageError> {
    let current = dataset(store, name)?;
    let mut next = current.next_version(now);
    let mut changed = false;
    for raw in paths {
        let path = normalize_path(raw)?;
        let checksum = tree.checksum(&path)?.ok_or_else(|| {
            LineageError::NotFound(
                ErrorInfo::new("missing-file", "file does not exist in the working tree")
                    .with_context("path", &path)
                    .with_context("dataset", name),
            )
        })?;
        let fresh = Entity::new(&path, &checksum)?;
        let entity = match store.try_get::<Entity>(&fresh.id)? {
            Some(entity) => entity,
            None => {
                store.put(fresh.clone())?;
                fresh
            }
        };
        if next.file(&path).map(|file| &file.entity) == Some(&entity.id) {
            continue;
        }
        next.files.retain(|file| file.path != path);
        next.files.push(DatasetFile {
            entity: entity.id.clone(),
            path,
            date_added: now,
            source: source.map(str::to_string),
        });
        changed = true;
    }
    if !changed {
        debug!(name, "dataset files already current");
        return Ok(current);
    }
    next.files.sort_by(|a, b| a.path.cmp(&b.path));
    store.put(next.clone())?;
    Ok(next)
}

/// Removes files; every path must be part of the dataset.
pub fn remove_dataset_files(
    store: &mut ObjectStore,
    name: &str,
    paths: &[String],
    now: DateTime<Utc>,
) -> Result<Dataset, LineageError> {
    let current = dataset(store, name)?;
    if paths.is_empty() {
        return Ok(current);
    }
    let mut next = current.next_version(now);
    for raw in paths {
        let path = normalize_path(raw)?;
        if next.file(&path).is_none() {
            return Err(LineageError::NotFound(
                ErrorInfo::new("file-not-in-dataset", "path is not part of the dataset")
                    .with_context("path", &path)
                    .with_context("dataset", name),
            ));
        }
        next.files.retain(|file| file.path != path);
    }
    store.put(next.clone())?;
    Ok(next)
}

/// Attaches a tag to the latest version. Tag names are unique per dataset.
pub fn tag_dataset(
    store: &mut ObjectStore,
    name: &str,
    tag: &str,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Dataset, LineageError> {
    let current = dataset(store, name)?;
    if current.tags.iter().any(|existing| existing.name == tag) {
        return Err(LineageError::Conflict(
            ErrorInfo::new("tag-exists", "dataset already has this tag")
                .with_context("dataset", name)
                .with_context("tag", tag),
        ));
    }
    let mut next = current.next_version(now);
    next.tags.push(DatasetTag {
        name: tag.to_string(),
        description: description.map(str::to_string),
        date_created: now,
    });
    store.put(next.clone())?;
    Ok(next)
}

/// Replaces the descriptive metadata.
pub fn edit_dataset(
    store: &mut ObjectStore,
    name: &str,
    metadata: DatasetMetadata,
    now: DateTime<Utc>,
) -> Result<Dataset, LineageError> {
    let current = dataset(store, name)?;
    if current.metadata == metadata {
        return Ok(current);
    }
    let mut next = current.next_version(now);
    next.metadata = metadata;
    store.put(next.clone())?;
    Ok(next)
}

/// Stages a version recording the dataset's removal.
pub fn remove_dataset(
    store: &mut ObjectStore,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Dataset, LineageError> {
    let current = dataset(store, name)?;
    let mut next = current.next_version(now);
    next.date_removed = Some(now);
    store.put(next.clone())?;
    info!(name, version = %next.id, "removed dataset");
    Ok(next)
}
