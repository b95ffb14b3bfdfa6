#![deny(missing_docs)]
#![doc = "File-backed object store for Lineage: sharded records, secondary indices, journaled commits and schema migrations."]

pub mod index;
pub mod journal;
pub mod layout;
pub mod lock;
pub mod migration;
mod object_store;
pub mod project;
mod rebuild;
pub mod root;

pub use index::{Direction, IndexDrift, IndexReport};
pub use layout::StoreLayout;
pub use lock::{LockMode, StoreLock};
pub use migration::{
    CompatibilityReport, MigrationOutcome, MigrationRegistry, MigrationStep, RebuildIndexCatalog,
};
pub use object_store::{CommitSummary, ObjectStore};
pub use project::{Project, ReadView, Transaction};
pub use root::{IndexDescriptor, RootRecord};
