//! Command-level facade over a project.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use lineage_core::config::LineageConfig;
use lineage_core::errors::LineageError;
use lineage_core::model::{
    Activity, CompositePlan, CompositeSpec, Dataset, DatasetMetadata, Plan, PlanSpec,
};
use lineage_core::paths::normalize_path;
use lineage_core::ObjectId;
use lineage_store::{CompatibilityReport, IndexReport, MigrationOutcome, Project};

use crate::activities::{self, ExecutionRecord};
use crate::composite::{self, ExpandedWorkflow};
use crate::rerun::{self, RerunPlan};
use crate::status::{self, PathStatus};
use crate::worktree::WorkingTree;
use crate::{datasets, graph, plans};

/// Entry point for recording and querying provenance in one project.
#[derive(Debug, Clone)]
pub struct Lineage {
    project: Project,
}

impl Lineage {
    /// Initialises a new project at `root`.
    pub fn init(root: &Path, config: LineageConfig) -> Result<Self, LineageError> {
        Ok(Self {
            project: Project::init(root, config)?,
        })
    }

    /// Opens an existing project.
    pub fn open(root: &Path) -> Result<Self, LineageError> {
        Ok(Self {
            project: Project::open(root)?,
        })
    }

    /// Underlying project handle.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Records one finished execution and returns the new activity id.
    pub fn record_execution(&self, record: ExecutionRecord) -> Result<ObjectId, LineageError> {
        self.project.write(|tx| {
            let agent = tx.config().default_agent.clone();
            activities::record_execution(tx.store_mut(), record, &agent, Utc::now())
        })
    }

    /// Status of each target against `tree`.
    pub fn compute_status(
        &self,
        tree: &dyn WorkingTree,
        targets: &[String],
    ) -> Result<BTreeMap<String, PathStatus>, LineageError> {
        self.project
            .read(|view| status::compute_status(view.store(), tree, targets))
    }

    /// Activities to re-execute so `targets` become current.
    pub fn plan_rerun(&self, tree: &dyn WorkingTree, targets: &[String]) -> Result<RerunPlan, LineageError> {
        self.project
            .read(|view| rerun::plan_rerun(view.store(), tree, targets))
    }

    /// Activities to re-execute so every generated path becomes current.
    pub fn plan_update_all(&self, tree: &dyn WorkingTree) -> Result<RerunPlan, LineageError> {
        self.project
            .read(|view| rerun::plan_update_all(view.store(), tree))
    }

    /// Upgrades the metadata store to `target`.
    pub fn migrate(&self, target: u32) -> Result<MigrationOutcome, LineageError> {
        self.project.migrate(target)
    }

    /// Compares the store's schema version with this build.
    pub fn check_compatibility(&self) -> Result<CompatibilityReport, LineageError> {
        self.project.check_compatibility()
    }

    /// Rebuilds every index from primary records.
    pub fn rebuild_indices(&self) -> Result<IndexReport, LineageError> {
        self.project.rebuild_indices()
    }

    /// Reports index drift without writing.
    pub fn verify_indices(&self) -> Result<IndexReport, LineageError> {
        self.project.verify_indices()
    }

    /// Resolves `spec` to an existing or new plan version without recording an execution.
    pub fn create_plan(&self, spec: &PlanSpec) -> Result<Plan, LineageError> {
        self.project
            .write(|tx| plans::resolve_plan(tx.store_mut(), spec, Utc::now()))
    }

    /// Latest live version of a plan.
    pub fn plan(&self, name: &str) -> Result<Plan, LineageError> {
        self.project.read(|view| plans::latest_plan(view.store(), name))
    }

    /// Every version of a plan, newest first.
    pub fn plan_history(&self, name: &str) -> Result<Vec<Plan>, LineageError> {
        self.project.read(|view| plans::plan_history(view.store(), name))
    }

    /// Removes a plan by writing a tombstone version.
    pub fn remove_plan(&self, name: &str) -> Result<Plan, LineageError> {
        self.project
            .write(|tx| plans::remove_plan(tx.store_mut(), name, Utc::now()))
    }

    /// Creates (or reuses) a composite plan after validating its expansion.
    pub fn create_composite(&self, spec: CompositeSpec) -> Result<CompositePlan, LineageError> {
        self.project
            .write(|tx| composite::create_composite(tx.store_mut(), spec, Utc::now()))
    }

    /// Latest version of a composite.
    pub fn composite(&self, name: &str) -> Result<CompositePlan, LineageError> {
        self.project
            .read(|view| composite::latest_composite(view.store(), name))
    }

    /// Expands the latest version of a composite into ordered plan steps.
    pub fn expand_composite(&self, name: &str) -> Result<ExpandedWorkflow, LineageError> {
        self.project.read(|view| {
            let plan = composite::latest_composite(view.store(), name)?;
            composite::expand(view.store(), &plan)
        })
    }

    /// Latest activity that generated `path`.
    pub fn producer_of(&self, path: &str) -> Result<Option<Activity>, LineageError> {
        let path = normalize_path(path)?;
        self.project.read(|view| graph::producer_of(view.store(), &path))
    }

    /// Activities that used any version of `path`.
    pub fn consumers_of(&self, path: &str) -> Result<Vec<Activity>, LineageError> {
        let path = normalize_path(path)?;
        self.project.read(|view| graph::consumers_of(view.store(), &path))
    }

    /// Paths `path` was transitively derived from.
    pub fn upstream(&self, path: &str) -> Result<BTreeSet<String>, LineageError> {
        let path = normalize_path(path)?;
        self.project.read(|view| graph::upstream(view.store(), &path))
    }

    /// Paths transitively derived from `path`.
    pub fn downstream(&self, path: &str) -> Result<BTreeSet<String>, LineageError> {
        let path = normalize_path(path)?;
        self.project.read(|view| graph::downstream(view.store(), &path))
    }

    /// Activities that ended in `[from, to)`.
    pub fn activities_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Activity>, LineageError> {
        self.project
            .read(|view| graph::activities_between(view.store(), from, to))
    }

    /// Creates a dataset.
    pub fn create_dataset(&self, name: &str, metadata: DatasetMetadata) -> Result<Dataset, LineageError> {
        self.project
            .write(|tx| datasets::create_dataset(tx.store_mut(), name, metadata, Utc::now()))
    }

    /// Adds files to a dataset at their current checksums in `tree`.
    pub fn add_dataset_files(
        &self,
        tree: &dyn WorkingTree,
        name: &str,
        paths: &[String],
        source: Option<&str>,
    ) -> Result<Dataset, LineageError> {
        self.project.write(|tx| {
            datasets::add_dataset_files(tx.store_mut(), tree, name, paths, source, Utc::now())
        })
    }

    /// Removes files from a dataset.
    pub fn remove_dataset_files(&self, name: &str, paths: &[String]) -> Result<Dataset, LineageError> {
        self.project
            .write(|tx| datasets::remove_dataset_files(tx.store_mut(), name, paths, Utc::now()))
    }

    /// Tags the latest version of a dataset.
    pub fn tag_dataset(
        &self,
        name: &str,
        tag: &str,
        description: Option<&str>,
    ) -> Result<Dataset, LineageError> {
        self.project
            .write(|tx| datasets::tag_dataset(tx.store_mut(), name, tag, description, Utc::now()))
    }

    /// Replaces a dataset's metadata.
    pub fn edit_dataset(&self, name: &str, metadata: DatasetMetadata) -> Result<Dataset, LineageError> {
        self.project
            .write(|tx| datasets::edit_dataset(tx.store_mut(), name, metadata, Utc::now()))
    }

    /// Marks a dataset as removed.
    pub fn remove_dataset(&self, name: &str) -> Result<Dataset, LineageError> {
        self.project
            .write(|tx| datasets::remove_dataset(tx.store_mut(), name, Utc::now()))
    }

    /// Latest live version of a dataset.
    pub fn dataset(&self, name: &str) -> Result<Dataset, LineageError> {
        self.project.read(|view| datasets::dataset(view.store(), name))
    }

    /// Versions of a dataset, newest first.
    pub fn dataset_history(&self, name: &str) -> Result<Vec<Dataset>, LineageError> {
        self.project
            .read(|view| datasets::dataset_history(view.store(), name))
    }
}
