use lineage_core::config::LineageConfig;
use lineage_core::errors::LineageError;
use lineage_core::model::{DatasetMetadata, Person};
use lineage_graph::{Lineage, SnapshotTree};
use tempfile::TempDir;

fn lineage() -> (TempDir, Lineage) {
    let dir = tempfile::tempdir().unwrap();
    let lineage = Lineage::init(dir.path(), LineageConfig::default()).unwrap();
    (dir, lineage)
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn metadata(title: &str) -> DatasetMetadata {
    DatasetMetadata {
        title: Some(title.into()),
        creators: vec![Person::named("Grace")],
        license: Some("CC-BY-4.0".into()),
        ..DatasetMetadata::default()
    }
}

#[test]
fn every_mutation_is_a_new_version() {
    let (_dir, lineage) = lineage();
    let first = lineage.create_dataset("survey", metadata("Survey 2024")).unwrap();
    assert_eq!(first.initial_identifier, first.id);

    let mut tree: SnapshotTree = [("data/a.csv", "a1"), ("data/b.csv", "b1")].into_iter().collect();
    let with_files = lineage
        .add_dataset_files(&tree, "survey", &paths(&["data/b.csv", "./data/a.csv"]), Some("https://example.org/raw"))
        .unwrap();
    assert_eq!(with_files.derived_from.as_ref(), Some(&first.id));
    let listed: Vec<_> = with_files.files.iter().map(|file| file.path.as_str()).collect();
    assert_eq!(listed, vec!["data/a.csv", "data/b.csv"]);
    assert_eq!(with_files.files[0].source.as_deref(), Some("https://example.org/raw"));

    let unchanged = lineage
        .add_dataset_files(&tree, "survey", &paths(&["data/a.csv"]), None)
        .unwrap();
    assert_eq!(unchanged.id, with_files.id);

    tree.set("data/a.csv", "a2");
    let refreshed = lineage
        .add_dataset_files(&tree, "survey", &paths(&["data/a.csv"]), None)
        .unwrap();
    assert_ne!(refreshed.file("data/a.csv").unwrap().entity, with_files.file("data/a.csv").unwrap().entity);
    assert_eq!(refreshed.files.len(), 2);

    let tagged = lineage.tag_dataset("survey", "v1.0", Some("first release")).unwrap();
    assert_eq!(tagged.tags[0].name, "v1.0");
    let err = lineage.tag_dataset("survey", "v1.0", None).unwrap_err();
    assert!(matches!(err, LineageError::Conflict(_)));

    let edited = lineage.edit_dataset("survey", metadata("Survey 2024 (revised)")).unwrap();
    assert_eq!(edited.metadata.title.as_deref(), Some("Survey 2024 (revised)"));
    assert_eq!(edited.tags.len(), 1);

    let untouched = lineage.remove_dataset_files("survey", &[]).unwrap();
    assert_eq!(untouched.id, edited.id);

    let trimmed = lineage.remove_dataset_files("survey", &paths(&["data/b.csv"])).unwrap();
    assert!(trimmed.file("data/b.csv").is_none());
    let err = lineage
        .remove_dataset_files("survey", &paths(&["data/b.csv"]))
        .unwrap_err();
    assert_eq!(err.code(), "file-not-in-dataset");

    let latest = lineage.dataset("survey").unwrap();
    assert_eq!(latest.id, trimmed.id);
    assert_eq!(latest.initial_identifier, first.id);

    let history: Vec<_> = lineage
        .dataset_history("survey")
        .unwrap()
        .into_iter()
        .map(|version| version.id)
        .collect();
    assert_eq!(
        history,
        vec![
            trimmed.id.clone(),
            edited.id.clone(),
            tagged.id.clone(),
            refreshed.id.clone(),
            with_files.id.clone(),
            first.id.clone(),
        ]
    );
}

#[test]
fn names_are_unique_until_removal() {
    let (_dir, lineage) = lineage();
    lineage.create_dataset("survey", DatasetMetadata::default()).unwrap();
    let err = lineage
        .create_dataset("survey", DatasetMetadata::default())
        .unwrap_err();
    assert_eq!(err.code(), "dataset-exists");

    let removed = lineage.remove_dataset("survey").unwrap();
    assert!(removed.is_removed());
    assert_eq!(lineage.dataset("survey").unwrap_err().code(), "dataset-removed");
    assert_eq!(lineage.dataset_history("survey").unwrap().len(), 2);

    let recreated = lineage.create_dataset("survey", DatasetMetadata::default()).unwrap();
    assert_eq!(lineage.dataset("survey").unwrap().id, recreated.id);
    assert_eq!(lineage.dataset_history("survey").unwrap().len(), 1);
}

#[test]
fn missing_files_and_datasets_are_reported() {
    let (_dir, lineage) = lineage();
    let tree = SnapshotTree::new();
    assert_eq!(lineage.dataset("nope").unwrap_err().code(), "unknown-dataset");
    assert_eq!(lineage.dataset_history("nope").unwrap_err().code(), "unknown-dataset");
    lineage.create_dataset("survey", DatasetMetadata::default()).unwrap();
    let err = lineage
        .add_dataset_files(&tree, "survey", &paths(&["data/missing.csv"]), None)
        .unwrap_err();
    assert!(matches!(err, LineageError::NotFound(_)));
    assert_eq!(err.code(), "missing-file");
    assert_eq!(
        lineage.create_dataset("", DatasetMetadata::default()).unwrap_err().code(),
        "invalid-dataset-name"
    );
}
