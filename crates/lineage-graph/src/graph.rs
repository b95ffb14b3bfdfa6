//! Provenance traversals over the usage and generation indices.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{time_prefix, Activity};
use lineage_core::record::index_names;
use lineage_core::ObjectId;
use lineage_store::ObjectStore;

/// Entity ids recorded for `path`, across all checksums.
pub fn entities_at(store: &ObjectStore, path: &str) -> Result<Vec<ObjectId>, LineageError> {
    store.lookup(index_names::ENTITIES_BY_PATH, path)
}

/// Like [`entities_at`], failing with `NotFound` when the path was never recorded.
pub fn known_entities(store: &ObjectStore, path: &str) -> Result<Vec<ObjectId>, LineageError> {
    let entities = entities_at(store, path)?;
    if entities.is_empty() {
        return Err(LineageError::NotFound(
            ErrorInfo::new("unknown-path", "path has never been recorded").with_context("path", path),
        ));
    }
    Ok(entities)
}

/// Orders activities by end time, then id.
pub fn chronological(a: &Activity, b: &Activity) -> std::cmp::Ordering {
    a.ended_at.cmp(&b.ended_at).then_with(|| a.id.cmp(&b.id))
}

/// Every activity that generated some version of `path`.
pub fn producers(store: &ObjectStore, path: &str) -> Result<Vec<Activity>, LineageError> {
    let mut activities = Vec::new();
    for entity in known_entities(store, path)? {
        for id in store.sources(index_names::GENERATION, &entity)? {
            activities.push(store.get::<Activity>(&id)?);
        }
    }
    activities.sort_by(chronological);
    Ok(activities)
}

/// The most recent activity that generated `path` (by end time, then id).
pub fn producer_of(store: &ObjectStore, path: &str) -> Result<Option<Activity>, LineageError> {
    Ok(producers(store, path)?.pop())
}

/// The activity that generated the exact entity version `entity`, if any.
pub fn generator_of(store: &ObjectStore, entity: &ObjectId) -> Result<Option<Activity>, LineageError> {
    match store.sources(index_names::GENERATION, entity)?.first() {
        Some(id) => Ok(Some(store.get::<Activity>(id)?)),
        None => Ok(None),
    }
}

/// Every activity that used some version of `path`, oldest first.
pub fn consumers_of(store: &ObjectStore, path: &str) -> Result<Vec<Activity>, LineageError> {
    let mut activities = Vec::new();
    let mut seen = BTreeSet::new();
    for entity in known_entities(store, path)? {
        for id in store.sources(index_names::USAGE, &entity)? {
            if seen.insert(id.clone()) {
                activities.push(store.get::<Activity>(&id)?);
            }
        }
    }
    activities.sort_by(chronological);
    Ok(activities)
}

/// Paths `path` was derived from, following latest producers transitively.
pub fn upstream(store: &ObjectStore, path: &str) -> Result<BTreeSet<String>, LineageError> {
    known_entities(store, path)?;
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([path.to_string()]);
    while let Some(current) = queue.pop_front() {
        let Some(producer) = producer_of(store, &current)? else {
            continue;
        };
        for usage in producer.usages {
            if found.insert(usage.path.clone()) {
                queue.push_back(usage.path);
            }
        }
    }
    found.remove(path);
    Ok(found)
}

/// Paths generated from `path`, transitively through every consumer.
pub fn downstream(store: &ObjectStore, path: &str) -> Result<BTreeSet<String>, LineageError> {
    known_entities(store, path)?;
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([path.to_string()]);
    while let Some(current) = queue.pop_front() {
        for consumer in consumers_of(store, &current)? {
            for generation in consumer.generations {
                if found.insert(generation.path.clone()) {
                    queue.push_back(generation.path);
                }
            }
        }
    }
    found.remove(path);
    Ok(found)
}

/// Activities that ended in `[from, to)`, in time order.
pub fn activities_between(
    store: &ObjectStore,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Activity>, LineageError> {
    if to <= from {
        return Ok(Vec::new());
    }
    store
        .range(index_names::ACTIVITIES_BY_TIME, &time_prefix(&from), &time_prefix(&to))?
        .into_iter()
        .map(|(_, id)| store.get::<Activity>(&id))
        .collect()
}

/// Every activity in the store, keyed by id.
pub fn all_activities(store: &ObjectStore) -> Result<BTreeMap<ObjectId, Activity>, LineageError> {
    store
        .range(index_names::ACTIVITIES_BY_TIME, "", "")?
        .into_iter()
        .map(|(_, id)| Ok((id.clone(), store.get::<Activity>(&id)?)))
        .collect()
}
