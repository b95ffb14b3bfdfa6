#![deny(missing_docs)]
#![doc = "Provenance graph engine for Lineage: plan reuse, activity recording, staleness, re-run planning, composites and datasets."]

pub mod activities;
pub mod composite;
pub mod datasets;
pub mod engine;
pub mod graph;
pub mod plans;
pub mod rerun;
pub mod status;
pub mod worktree;

pub use activities::{Artifact, ExecutionRecord};
pub use composite::{ExpandedStep, ExpandedWorkflow};
pub use engine::Lineage;
pub use rerun::{RerunPlan, RerunStep};
pub use status::{PathStatus, StaleReason};
pub use worktree::{FsWorkingTree, SnapshotTree, WorkingTree};
