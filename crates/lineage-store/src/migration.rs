//! Schema migration driver.
//!
//! Each registered step upgrades the store by exactly one version. The driver
//! commits a step's effects before it moves the version marker, so a crash
//! between the two leaves the store at the old version with a step that is
//! safe to run again.

use std::collections::BTreeMap;
use std::fmt;

use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::CURRENT_SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::object_store::ObjectStore;

/// One idempotent upgrade from `from_version()` to `from_version() + 1`.
pub trait MigrationStep: Send + Sync {
    /// Version the step upgrades from.
    fn from_version(&self) -> u32;

    /// Name reported in logs and errors.
    fn name(&self) -> &str;

    /// Stages the step's changes; the driver commits them.
    fn apply(&self, store: &mut ObjectStore) -> Result<(), LineageError>;
}

/// Rewrites the index catalog and rebuilds every index from primary records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildIndexCatalog;

impl MigrationStep for RebuildIndexCatalog {
    fn from_version(&self) -> u32 {
        1
    }

    fn name(&self) -> &str {
        "rebuild-index-catalog"
    }

    fn apply(&self, store: &mut ObjectStore) -> Result<(), LineageError> {
        store.refresh_catalog();
        store.rebuild_indices()?;
        Ok(())
    }
}

/// Steps keyed by the version they upgrade from.
pub struct MigrationRegistry {
    steps: BTreeMap<u32, Box<dyn MigrationStep>>,
    supported: u32,
}

impl MigrationRegistry {
    /// Registry with no steps that supports up to `supported`.
    pub fn empty(supported: u32) -> Self {
        Self {
            steps: BTreeMap::new(),
            supported,
        }
    }

    /// Registry with the steps shipped in this build.
    pub fn builtin() -> Self {
        let mut registry = Self::empty(CURRENT_SCHEMA_VERSION);
        registry.steps.insert(1, Box::new(RebuildIndexCatalog));
        registry
    }

    /// Adds a step; at most one step per source version.
    pub fn register(&mut self, step: Box<dyn MigrationStep>) -> Result<(), LineageError> {
        let from = step.from_version();
        if let Some(existing) = self.steps.get(&from) {
            return Err(LineageError::Conflict(
                ErrorInfo::new("duplicate-migration", "a step already upgrades from this version")
                    .with_context("from_version", from)
                    .with_context("existing", existing.name())
                    .with_context("step", step.name()),
            ));
        }
        self.steps.insert(from, step);
        Ok(())
    }

    /// Highest version the registry can reach.
    pub fn supported(&self) -> u32 {
        self.supported
    }

    /// Step upgrading from `version`.
    pub fn step(&self, version: u32) -> Option<&dyn MigrationStep> {
        self.steps.get(&version).map(Box::as_ref)
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("supported", &self.supported)
            .field(
                "steps",
                &self
                    .steps
                    .iter()
                    .map(|(from, step)| (*from, step.name().to_string()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    /// Version before the run.
    pub from: u32,
    /// Version after the run.
    pub to: u32,
    /// Names of the steps applied, in order.
    pub applied: Vec<String>,
}

/// Relationship between a store and this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    /// Version recorded in the store.
    pub project_version: u32,
    /// Version this build operates on.
    pub supported: u32,
    /// Whether the store must be migrated before use.
    pub migration_required: bool,
}

impl CompatibilityReport {
    /// Compares a store version with the supported one.
    pub fn new(project_version: u32, supported: u32) -> Self {
        Self {
            project_version,
            supported,
            migration_required: project_version < supported,
        }
    }
}

/// Upgrades `store` to `target`, committing after every step.
pub fn migrate(
    store: &mut ObjectStore,
    registry: &MigrationRegistry,
    target: u32,
) -> Result<MigrationOutcome, LineageError> {
    let from = store.schema_version();
    if target > registry.supported() {
        return Err(LineageError::SchemaMismatch(
            ErrorInfo::new("target-unsupported", "target version is newer than this build")
                .with_context("target", target)
                .with_context("supported", registry.supported()),
        ));
    }
    if from > target {
        return Err(LineageError::SchemaMismatch(
            ErrorInfo::new("store-newer", "store is newer than the target version")
                .with_context("project_version", from)
                .with_context("target", target)
                .with_hint("use a newer release to open this project"),
        ));
    }
    if let Some(gap) = (from..target).find(|version| registry.step(*version).is_none()) {
        return Err(LineageError::UnsupportedVersion(
            ErrorInfo::new("no-migration-path", "no migration step upgrades from this version")
                .with_context("version", gap)
                .with_context("project_version", from)
                .with_context("target", target),
        ));
    }

    let mut applied = Vec::new();
    let mut current = from;
    while current < target {
        let Some(step) = registry.step(current) else {
            break;
        };
        info!(step = step.name(), from = current, to = current + 1, "applying migration step");
        let result = step
            .apply(store)
            .and_then(|()| store.commit().map(|_| ()))
            .and_then(|()| {
                store.set_schema_version(current + 1);
                store.commit().map(|_| ())
            });
        if let Err(err) = result {
            store.rollback();
            return Err(LineageError::MigrationFailed(
                ErrorInfo::new("migration-step-failed", "migration step did not complete")
                    .with_context("step", step.name())
                    .with_context("remaining_at", current)
                    .with_context("cause", err),
            ));
        }
        applied.push(step.name().to_string());
        current += 1;
    }
    if !applied.is_empty() {
        info!(from, to = current, steps = applied.len(), "migration finished");
    }
    Ok(MigrationOutcome {
        from,
        to: current,
        applied,
    })
}
