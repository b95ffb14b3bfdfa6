//! Staleness of generated artifacts against the working tree.

use std::collections::{BTreeMap, BTreeSet};

use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::model::Activity;
use lineage_core::paths::normalize_path;
use lineage_core::ObjectId;
use lineage_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{generator_of, producer_of};
use crate::worktree::WorkingTree;

/// Why a path is out of date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum StaleReason {
    /// An input's content differs from what the producer used.
    InputModified {
        /// Input path.
        path: String,
        /// Checksum recorded at execution time.
        recorded: String,
        /// Checksum now.
        current: String,
    },
    /// An input no longer exists.
    InputMissing {
        /// Input path.
        path: String,
    },
    /// An input is itself stale.
    UpstreamStale {
        /// Input path.
        path: String,
    },
}

impl StaleReason {
    /// Input path the reason refers to.
    pub fn path(&self) -> &str {
        match self {
            StaleReason::InputModified { path, .. }
            | StaleReason::InputMissing { path }
            | StaleReason::UpstreamStale { path } => path,
        }
    }
}

/// Status of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reasons", rename_all = "kebab-case")]
pub enum PathStatus {
    /// Regenerating would produce the same content.
    UpToDate,
    /// Regeneration is needed for the listed reasons.
    Stale(Vec<StaleReason>),
}

impl PathStatus {
    /// Whether the path needs regeneration.
    pub fn is_stale(&self) -> bool {
        matches!(self, PathStatus::Stale(_))
    }

    /// Reasons, empty when up to date.
    pub fn reasons(&self) -> &[StaleReason] {
        match self {
            PathStatus::UpToDate => &[],
            PathStatus::Stale(reasons) => reasons,
        }
    }
}

/// Computes the status of every target. Shared ancestry is evaluated once.
///
/// A target is judged by its latest producer. An unchanged input is judged by
/// the activity that generated the exact version that was used.
pub fn compute_status(
    store: &ObjectStore,
    tree: &dyn WorkingTree,
    targets: &[String],
) -> Result<BTreeMap<String, PathStatus>, LineageError> {
    let mut walker = StatusWalker {
        store,
        tree,
        memo: BTreeMap::new(),
        visiting: BTreeSet::new(),
    };
    let mut statuses = BTreeMap::new();
    for target in targets {
        let path = normalize_path(target)?;
        let status = match producer_of(store, &path)? {
            Some(producer) => walker.status_of(&producer)?,
            None => PathStatus::UpToDate,
        };
        statuses.insert(path, status);
    }
    debug!(targets = statuses.len(), evaluated = walker.memo.len(), "computed status");
    Ok(statuses)
}

struct StatusWalker<'a> {
    store: &'a ObjectStore,
    tree: &'a dyn WorkingTree,
    memo: BTreeMap<ObjectId, PathStatus>,
    visiting: BTreeSet<ObjectId>,
}

impl StatusWalker<'_> {
    /// Status of everything `producer` generated.
    fn status_of(&mut self, producer: &Activity) -> Result<PathStatus, LineageError> {
        if let Some(status) = self.memo.get(&producer.id) {
            return Ok(status.clone());
        }
        if !self.visiting.insert(producer.id.clone()) {
            return Err(LineageError::CyclicComposition(
                ErrorInfo::new("provenance-cycle", "activity reached again through its own inputs")
                    .with_context("activity", &producer.id),
            ));
        }
        let mut reasons = Vec::new();
        for usage in &producer.usages {
            match self.tree.checksum(&usage.path)? {
                None => reasons.push(StaleReason::InputMissing {
                    path: usage.path.clone(),
                }),
                Some(current) if current != usage.checksum => {
                    reasons.push(StaleReason::InputModified {
                        path: usage.path.clone(),
                        recorded: usage.checksum.clone(),
                        current,
                    })
                }
                Some(_) => {
                    let Some(upstream) = generator_of(self.store, &usage.entity)? else {
                        continue;
                    };
                    if upstream.id != producer.id && self.status_of(&upstream)?.is_stale() {
                        reasons.push(StaleReason::UpstreamStale {
                            path: usage.path.clone(),
                        });
                    }
                }
            }
        }
        self.visiting.remove(&producer.id);
        let status = if reasons.is_empty() {
            PathStatus::UpToDate
        } else {
            PathStatus::Stale(reasons)
        };
        self.memo.insert(producer.id.clone(), status.clone());
        Ok(status)
    }
}
