use std::fs;

use chrono::{TimeZone, Utc};
use lineage_codec::RecordCodec;
use lineage_core::config::LineageConfig;
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::{Activity, Agent, Entity, EntityRef, Person, Plan, PlanSpec};
use lineage_core::record::{index_names, Record, RecordKind};
use lineage_core::ObjectId;
use lineage_store::journal::{Journal, PendingRename};
use lineage_store::{Project, StoreLock};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn project_with(config: LineageConfig) -> (TempDir, Project) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let project = Project::init(dir.path(), config).unwrap();
    (dir, project)
}

fn project() -> (TempDir, Project) {
    project_with(LineageConfig {
        shard_buckets: 8,
        ..LineageConfig::default()
    })
}

fn activity(plan: &Plan, inputs: &[&Entity], outputs: &[&Entity]) -> Activity {
    let at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
    Activity {
        id: ObjectId::generate(RecordKind::Activity),
        plan: plan.id.clone(),
        agent: Agent::Person(Person::named("Grace")),
        started_at: at,
        ended_at: at,
        parameters: Default::default(),
        usages: inputs.iter().map(|e| EntityRef::from(*e)).collect(),
        generations: outputs.iter().map(|e| EntityRef::from(*e)).collect(),
        extra: Default::default(),
    }
}

#[test]
fn records_survive_across_sessions() {
    let (_dir, project) = project();
    let entity = Entity::new("data/input.csv", "c1").unwrap();
    let id = project.write(|tx| tx.put(entity.clone())).unwrap();

    project
        .read(|view| {
            assert_eq!(view.get::<Entity>(&id)?, entity);
            assert!(view.contains(&id)?);
            assert_eq!(view.ids(RecordKind::Entity)?, vec![id.clone()]);
            assert_eq!(
                view.lookup(index_names::ENTITIES_BY_PATH, "data/input.csv")?,
                vec![id.clone()]
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn append_only_records_conflict_on_different_content() {
    let (_dir, project) = project();
    let entity = Entity::new("data/input.csv", "c1").unwrap();
    project.write(|tx| tx.put(entity.clone())).unwrap();

    project.write(|tx| tx.put(entity.clone())).unwrap();
    let err = project
        .write(|tx| tx.put(entity.clone().directory()))
        .unwrap_err();
    assert!(matches!(err, LineageError::Conflict(_)));
    assert_eq!(err.code(), "immutable-record");
    assert_eq!(err.info().context["id"], entity.id.as_str());
}

#[test]
fn failed_sessions_leave_nothing_behind() {
    let (_dir, project) = project();
    let entity = Entity::new("data/input.csv", "c1").unwrap();
    let err = project
        .write(|tx| {
            tx.put(entity.clone())?;
            Err::<(), _>(LineageError::InvalidInput(ErrorInfo::new("abort", "stop")))
        })
        .unwrap_err();
    assert_eq!(err.code(), "abort");

    project
        .read(|view| {
            assert_eq!(view.try_get::<Entity>(&entity.id)?, None);
            assert!(view.lookup(index_names::ENTITIES_BY_PATH, "data/input.csv")?.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn staged_writes_are_visible_inside_the_session() {
    let (_dir, project) = project();
    let entity = Entity::new("out/model.bin", "m1").unwrap();
    project
        .write(|tx| {
            tx.put(entity.clone())?;
            assert_eq!(tx.get::<Entity>(&entity.id)?, entity);
            assert_eq!(
                tx.lookup(index_names::ENTITIES_BY_PATH, "out/model.bin")?,
                vec![entity.id.clone()]
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn range_and_prefix_merge_every_bucket_in_key_order() {
    let (_dir, project) = project();
    let paths = ["out/c.txt", "data/b.csv", "data/a.csv", "logs/run.log"];
    project
        .write(|tx| {
            for path in paths {
                tx.put(Entity::new(path, "x")?)?;
            }
            Ok(())
        })
        .unwrap();

    project
        .read(|view| {
            let keys = |pairs: Vec<(String, ObjectId)>| {
                pairs.into_iter().map(|(key, _)| key).collect::<Vec<_>>()
            };
            assert_eq!(
                keys(view.prefix(index_names::ENTITIES_BY_PATH, "data/")?),
                vec!["data/a.csv", "data/b.csv"]
            );
            assert_eq!(
                keys(view.range(index_names::ENTITIES_BY_PATH, "data/b", "out/z")?),
                vec!["data/b.csv", "logs/run.log", "out/c.txt"]
            );
            assert_eq!(view.range(index_names::ENTITIES_BY_PATH, "", "")?.len(), 4);
            Ok(())
        })
        .unwrap();
}

#[test]
fn relation_indices_answer_both_directions() {
    let (_dir, project) = project();
    let input = Entity::new("data/input.csv", "c1").unwrap();
    let output = Entity::new("output/count.txt", "c2").unwrap();
    let plan = Plan::from_spec(&PlanSpec::new(["wc", "-l"]), Utc::now(), None).unwrap();
    let run = activity(&plan, &[&input], &[&output]);
    project
        .write(|tx| {
            tx.put(input.clone())?;
            tx.put(output.clone())?;
            tx.put(plan.clone())?;
            tx.put(run.clone())
        })
        .unwrap();

    project
        .read(|view| {
            assert_eq!(view.targets(index_names::USAGE, &run.id)?, vec![input.id.clone()]);
            assert_eq!(view.sources(index_names::GENERATION, &output.id)?, vec![run.id.clone()]);
            assert_eq!(view.targets(index_names::PLAN_ACTIVITIES, &plan.id)?, vec![run.id.clone()]);
            assert!(view.sources(index_names::GENERATION, &input.id)?.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn index_names_are_checked_against_the_catalog() {
    let (_dir, project) = project();
    let err = project
        .read(|view| view.lookup("no-such-index", "k"))
        .unwrap_err();
    assert_eq!(err.code(), "unknown-index");
    let err = project
        .read(|view| view.lookup(index_names::USAGE, "k"))
        .unwrap_err();
    assert_eq!(err.code(), "unknown-index");
}

#[test]
fn reading_with_the_wrong_type_is_corrupt() {
    let (_dir, project) = project();
    let entity = Entity::new("a.txt", "c").unwrap();
    project.write(|tx| tx.put(entity.clone())).unwrap();
    let err = project.read(|view| view.get::<Plan>(&entity.id)).unwrap_err();
    assert!(matches!(err, LineageError::CorruptRecord(_)));
    let err = project
        .read(|view| view.get::<Entity>(&ObjectId::for_entity("missing", "c")))
        .unwrap_err();
    assert!(matches!(err, LineageError::NotFound(_)));
}

#[test]
fn uncompressed_stores_write_plain_json() {
    let (_dir, project) = project_with(LineageConfig {
        compress_records: false,
        shard_buckets: 4,
        ..LineageConfig::default()
    });
    let entity = Entity::new("a.txt", "c").unwrap();
    project.write(|tx| tx.put(entity.clone())).unwrap();
    let bytes = fs::read(project.layout().object_path(RecordKind::Entity, &entity.id)).unwrap();
    assert_eq!(bytes.first(), Some(&b'{'));
}

#[test]
fn second_writer_gets_lock_contention() {
    let (_dir, project) = project_with(LineageConfig {
        lock_retries: 2,
        lock_backoff_ms: 1,
        ..LineageConfig::default()
    });
    let held = StoreLock::exclusive(&project.layout().lock_path(), 0, 1).unwrap();
    let err = project.write(|_| Ok(())).unwrap_err();
    assert!(matches!(err, LineageError::LockContention(_)));
    drop(held);
    project.write(|_| Ok(())).unwrap();
}

#[test]
fn interrupted_commit_is_rolled_forward_by_the_next_writer() {
    let (_dir, project) = project();
    let layout = project.layout().clone();
    let entity = Entity::new("data/input.csv", "c1").unwrap();
    let bytes = RecordCodec::new(true).encode(&entity).unwrap();
    fs::write(layout.tmp_dir().join("crashed-000000"), &bytes).unwrap();

    let target = layout.object_path(RecordKind::Entity, &entity.id);
    let to = target
        .strip_prefix(layout.dir())
        .unwrap()
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let journal = Journal {
        started_at: Utc::now(),
        renames: vec![PendingRename {
            from: "tmp/crashed-000000".into(),
            to,
        }],
    };
    journal.persist(&layout).unwrap();
    assert!(layout.journal_path().exists());

    project.write(|_| Ok(())).unwrap();
    assert!(!layout.journal_path().exists());
    let stored = project.read(|view| view.get::<Entity>(&entity.id)).unwrap();
    assert_eq!(stored.id(), &entity.id);
}

#[test]
fn init_and_open_report_store_presence() {
    let dir = tempfile::tempdir().unwrap();
    let err = Project::open(dir.path()).unwrap_err();
    assert_eq!(err.code(), "not-initialized");

    Project::init(dir.path(), LineageConfig::default()).unwrap();
    let err = Project::init(dir.path(), LineageConfig::default()).unwrap_err();
    assert_eq!(err.code(), "already-initialized");
    let reopened = Project::open(dir.path()).unwrap();
    assert_eq!(reopened.config(), &LineageConfig::default());
}
