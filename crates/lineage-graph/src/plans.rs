//! Plan reuse, versioning and removal.

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{Plan, PlanSpec};
use lineage_core::record::{index_names, RecordKind};
use lineage_core::ObjectId;
use lineage_store::ObjectStore;
use tracing::debug;

/// Whether another plan version derives from `id`.
pub fn is_deprecated(store: &ObjectStore, id: &ObjectId) -> Result<bool, LineageError> {
    Ok(!store.targets(index_names::PLAN_DERIVATION, id)?.is_empty())
}

/// Every stored version carrying `name`, oldest first.
pub fn plan_versions(store: &ObjectStore, name: &str) -> Result<Vec<Plan>, LineageError> {
    let mut plans = store
        .lookup(index_names::PLANS_BY_NAME, name)?
        .iter()
        .map(|id| store.get::<Plan>(id))
        .collect::<Result<Vec<_>, _>>()?;
    plans.sort_by(|a, b| {
        a.date_created
            .cmp(&b.date_created)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(plans)
}

/// Latest non-deprecated version of `name`, tombstones included.
pub fn latest_version(store: &ObjectStore, name: &str) -> Result<Option<Plan>, LineageError> {
    let mut latest = None;
    for plan in plan_versions(store, name)? {
        if !is_deprecated(store, &plan.id)? {
            latest = Some(plan);
        }
    }
    Ok(latest)
}

/// Latest live version of `name`.
pub fn latest_plan(store: &ObjectStore, name: &str) -> Result<Plan, LineageError> {
    match latest_version(store, name)? {
        Some(plan) if !plan.is_removed() => Ok(plan),
        Some(plan) => Err(LineageError::NotFound(
            ErrorInfo::new("plan-removed", "plan has been removed")
                .with_context("name", name)
                .with_context("tombstone", &plan.id),
        )),
        None => Err(unknown_plan(name)),
    }
}

/// All versions of `name`, newest first.
pub fn plan_history(store: &ObjectStore, name: &str) -> Result<Vec<Plan>, LineageError> {
    let mut plans = plan_versions(store, name)?;
    if plans.is_empty() {
        return Err(unknown_plan(name));
    }
    plans.reverse();
    Ok(plans)
}

/// Finds or creates the plan version matching `spec`.
///
/// An existing version is reused only when it is the latest live version of
/// its name and its structural key is identical. Otherwise a new version is
/// staged, derived from the closest prior match.
pub fn resolve_plan(
    store: &mut ObjectStore,
    spec: &PlanSpec,
    now: DateTime<Utc>,
) -> Result<Plan, LineageError> {
    spec.validate()?;
    let key = spec.structural_key()?;
    let name = match &spec.name {
        Some(name) => name.clone(),
        None => spec.derived_name()?,
    };

    let same_name = latest_version(store, &name)?;
    if let Some(plan) = &same_name {
        if !plan.is_removed() && plan.structural_key()? == key {
            debug!(plan = %plan.id, name = %plan.name, "reusing plan");
            return Ok(plan.clone());
        }
    }
    let closest = match same_name {
        Some(plan) => Some(plan.id),
        None => closest_by_command(store, spec)?.map(|plan| plan.id),
    };
    let plan = Plan::from_spec(spec, now, closest)?;
    debug!(plan = %plan.id, name = %plan.name, derived_from = ?plan.derived_from, "new plan version");
    store.put(plan.clone())?;
    Ok(plan)
}

/// Latest live plan with the same command whose name is derived from it.
fn closest_by_command(
    store: &ObjectStore,
    spec: &PlanSpec,
) -> Result<Option<Plan>, LineageError> {
    if spec.name.is_some() {
        return Ok(None);
    }
    let derived = spec.derived_name()?;
    let stem = match derived.rsplit_once('-') {
        Some((stem, _)) => format!("{stem}-"),
        None => return Ok(None),
    };
    let mut closest: Option<Plan> = None;
    for (_, id) in store.prefix(index_names::PLANS_BY_NAME, &stem)? {
        let plan = store.get::<Plan>(&id)?;
        if plan.command != spec.command || plan.is_removed() || is_deprecated(store, &plan.id)? {
            continue;
        }
        let newer = closest.as_ref().map_or(true, |current| {
            (plan.date_created, &plan.id) > (current.date_created, &current.id)
        });
        if newer {
            closest = Some(plan);
        }
    }
    Ok(closest)
}

/// Stages a tombstone version of `name` and returns it.
pub fn remove_plan(
    store: &mut ObjectStore,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Plan, LineageError> {
    let latest = latest_plan(store, name)?;
    let mut tombstone = latest.clone();
    tombstone.id = ObjectId::generate(RecordKind::Plan);
    tombstone.date_created = now;
    tombstone.derived_from = Some(latest.id.clone());
    tombstone.invalidated_at = Some(now);
    store.put(tombstone.clone())?;
    debug!(name, tombstone = %tombstone.id, "plan removed");
    Ok(tombstone)
}

fn unknown_plan(name: &str) -> LineageError {
    LineageError::NotFound(ErrorInfo::new("unknown-plan", "no plan with this name").with_context("name", name))
}
