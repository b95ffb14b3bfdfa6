use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use lineage_codec::RecordCodec;
use lineage_core::config::LineageConfig;
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::Entity;
use lineage_core::CURRENT_SCHEMA_VERSION;
use lineage_store::{MigrationRegistry, MigrationStep, ObjectStore, Project, RebuildIndexCatalog};
use tempfile::TempDir;
use walkdir::WalkDir;

fn project_at_version(version: u32) -> (TempDir, Project) {
    let dir = tempfile::tempdir().unwrap();
    let project = Project::init(
        dir.path(),
        LineageConfig {
            shard_buckets: 4,
            ..LineageConfig::default()
        },
    )
    .unwrap();
    project
        .write(|tx| tx.put(Entity::new("data/input.csv", "c1")?))
        .unwrap();
    let mut store = ObjectStore::open(project.layout().clone(), RecordCodec::default()).unwrap();
    store.set_schema_version(version);
    store.commit().unwrap();
    (dir, project)
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let key = entry.path().strip_prefix(dir).unwrap().display().to_string();
            (key, fs::read(entry.path()).unwrap())
        })
        .collect()
}

struct FailingStep;

impl MigrationStep for FailingStep {
    fn from_version(&self) -> u32 {
        1
    }

    fn name(&self) -> &str {
        "always-fails"
    }

    fn apply(&self, store: &mut ObjectStore) -> Result<(), LineageError> {
        store.put(Entity::new("scratch.txt", "s")?)?;
        Err(LineageError::InvalidInput(ErrorInfo::new("boom", "step failed")))
    }
}

struct AddMarker;

impl MigrationStep for AddMarker {
    fn from_version(&self) -> u32 {
        2
    }

    fn name(&self) -> &str {
        "add-marker"
    }

    fn apply(&self, store: &mut ObjectStore) -> Result<(), LineageError> {
        store.put(Entity::new(".marker", "v3")?)?;
        Ok(())
    }
}

#[test]
fn up_to_date_store_is_a_no_op() {
    let (_dir, project) = project_at_version(CURRENT_SCHEMA_VERSION);
    for _ in 0..2 {
        let outcome = project.migrate(CURRENT_SCHEMA_VERSION).unwrap();
        assert_eq!(outcome.from, CURRENT_SCHEMA_VERSION);
        assert_eq!(outcome.to, CURRENT_SCHEMA_VERSION);
        assert!(outcome.applied.is_empty());
    }
}

#[test]
fn old_store_is_refused_until_migrated() {
    let (_dir, project) = project_at_version(1);
    let err = project.read(|_| Ok(())).unwrap_err();
    assert!(matches!(err, LineageError::SchemaMismatch(_)));
    assert!(err.info().hint.as_deref().unwrap().contains("migrate"));

    let report = project.check_compatibility().unwrap();
    assert_eq!(report.project_version, 1);
    assert!(report.migration_required);

    let outcome = project.migrate(CURRENT_SCHEMA_VERSION).unwrap();
    assert_eq!((outcome.from, outcome.to), (1, 2));
    assert_eq!(outcome.applied, vec!["rebuild-index-catalog".to_string()]);
    assert!(!project.check_compatibility().unwrap().migration_required);
    assert!(project.verify_indices().unwrap().is_clean());

    let again = project.migrate(CURRENT_SCHEMA_VERSION).unwrap();
    assert_eq!((again.from, again.to), (2, 2));
}

#[test]
fn version_ordering_errors_are_raised_before_writing() {
    let (_dir, project) = project_at_version(CURRENT_SCHEMA_VERSION);
    let err = project.migrate(1).unwrap_err();
    assert!(matches!(err, LineageError::SchemaMismatch(_)));
    assert_eq!(err.code(), "store-newer");
    let err = project.migrate(CURRENT_SCHEMA_VERSION + 1).unwrap_err();
    assert_eq!(err.code(), "target-unsupported");
    assert_eq!(project.check_compatibility().unwrap().project_version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn missing_step_is_unsupported() {
    let (_dir, project) = project_at_version(1);
    let err = project
        .migrate_with(&MigrationRegistry::empty(CURRENT_SCHEMA_VERSION), 2)
        .unwrap_err();
    assert!(matches!(err, LineageError::UnsupportedVersion(_)));
    assert_eq!(err.info().context["version"], "1");
    assert_eq!(project.check_compatibility().unwrap().project_version, 1);
}

#[test]
fn failing_step_leaves_the_store_at_its_version() {
    let (_dir, project) = project_at_version(1);
    let mut registry = MigrationRegistry::empty(CURRENT_SCHEMA_VERSION);
    registry.register(Box::new(FailingStep)).unwrap();
    let err = project.migrate_with(&registry, 2).unwrap_err();
    assert!(matches!(err, LineageError::MigrationFailed(_)));
    assert_eq!(err.info().context["step"], "always-fails");
    assert_eq!(err.info().context["remaining_at"], "1");
    assert_eq!(project.check_compatibility().unwrap().project_version, 1);

    let mut store = ObjectStore::open(project.layout().clone(), RecordCodec::default()).unwrap();
    assert_eq!(store.try_get::<Entity>(&Entity::new("scratch.txt", "s").unwrap().id).unwrap(), None);
    assert!(!store.has_pending());
    store.rollback();
}

#[test]
fn chained_steps_apply_in_order() {
    let (_dir, project) = project_at_version(1);
    let mut registry = MigrationRegistry::empty(3);
    registry.register(Box::new(RebuildIndexCatalog)).unwrap();
    registry.register(Box::new(AddMarker)).unwrap();
    let duplicate = registry.register(Box::new(RebuildIndexCatalog)).unwrap_err();
    assert!(matches!(duplicate, LineageError::Conflict(_)));

    let outcome = project.migrate_with(&registry, 3).unwrap();
    assert_eq!(outcome.applied, vec!["rebuild-index-catalog", "add-marker"]);
    let report = project.check_compatibility().unwrap();
    assert_eq!(report.project_version, 3);
    assert!(!report.migration_required);
    assert!(matches!(
        project.write(|_| Ok(())).unwrap_err(),
        LineageError::SchemaMismatch(_)
    ));
}

#[test]
fn interrupted_step_is_safe_to_run_again() {
    let (_dir, project) = project_at_version(1);

    // Effects committed, version marker never moved.
    let mut store = ObjectStore::open(project.layout().clone(), RecordCodec::default()).unwrap();
    RebuildIndexCatalog.apply(&mut store).unwrap();
    AddMarker.apply(&mut store).unwrap();
    store.commit().unwrap();
    assert_eq!(project.check_compatibility().unwrap().project_version, 1);

    let mut registry = MigrationRegistry::empty(3);
    registry.register(Box::new(RebuildIndexCatalog)).unwrap();
    registry.register(Box::new(AddMarker)).unwrap();
    let outcome = project.migrate_with(&registry, 3).unwrap();
    assert_eq!((outcome.from, outcome.to), (1, 3));
    assert_eq!(outcome.applied, vec!["rebuild-index-catalog", "add-marker"]);

    let store = ObjectStore::open(project.layout().clone(), RecordCodec::default()).unwrap();
    assert_eq!(store.schema_version(), 3);
    let marker = Entity::new(".marker", "v3").unwrap();
    assert_eq!(store.get::<Entity>(&marker.id).unwrap(), marker);
    assert!(store.verify_indices().unwrap().is_clean());

    let indices = project.layout().indices_dir();
    let migrated = snapshot(&indices);
    let mut fresh = ObjectStore::open(project.layout().clone(), RecordCodec::default()).unwrap();
    fs::remove_dir_all(&indices).unwrap();
    fresh.rebuild_indices().unwrap();
    fresh.commit().unwrap();
    assert_eq!(snapshot(&indices), migrated);
}
