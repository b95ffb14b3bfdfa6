//! Project handle: configuration, locking and scoped store sessions.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use chrono::Utc;
use lineage_codec::RecordCodec;
use lineage_core::config::LineageConfig;
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::CURRENT_SCHEMA_VERSION;
use tracing::{debug, info};

use crate::index::IndexReport;
use crate::journal::recover;
use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::migration::{self, CompatibilityReport, MigrationOutcome, MigrationRegistry};
use crate::object_store::ObjectStore;
use crate::root::RootRecord;

/// Write session handed to [`Project::write`] closures.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a mut ObjectStore,
    config: &'a LineageConfig,
}

impl<'a> Transaction<'a> {
    /// Project configuration.
    pub fn config(&self) -> &LineageConfig {
        self.config
    }

    /// Store in read mode.
    pub fn store(&self) -> &ObjectStore {
        &*self.store
    }

    /// Store in write mode.
    pub fn store_mut(&mut self) -> &mut ObjectStore {
        &mut *self.store
    }
}

impl Deref for Transaction<'_> {
    type Target = ObjectStore;

    fn deref(&self) -> &ObjectStore {
        &*self.store
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut ObjectStore {
        &mut *self.store
    }
}

/// Read session handed to [`Project::read`] closures.
#[derive(Debug, Clone, Copy)]
pub struct ReadView<'a> {
    store: &'a ObjectStore,
    config: &'a LineageConfig,
}

impl<'a> ReadView<'a> {
    /// Project configuration.
    pub fn config(&self) -> &'a LineageConfig {
        self.config
    }

    /// Store in read mode.
    pub fn store(&self) -> &'a ObjectStore {
        self.store
    }
}

impl Deref for ReadView<'_> {
    type Target = ObjectStore;

    fn deref(&self) -> &ObjectStore {
        self.store
    }
}

/// An initialised project directory.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: LineageConfig,
    layout: StoreLayout,
}

impl Project {
    /// Creates the metadata store and writes the configuration.
    pub fn init(root: &Path, config: LineageConfig) -> Result<Self, LineageError> {
        config.validate()?;
        let layout = StoreLayout::new(config.metadata_path(root), config.shard_buckets);
        if layout.is_initialized() {
            return Err(LineageError::Conflict(
                ErrorInfo::new("already-initialized", "project already has a metadata store")
                    .with_context("path", layout.dir().display()),
            ));
        }
        config.save(root)?;
        layout.ensure_dirs()?;
        let project = Self {
            root: root.to_path_buf(),
            config,
            layout,
        };
        let _lock = project.lock_exclusive()?;
        let mut store = ObjectStore::create(
            project.layout.clone(),
            project.codec(),
            RootRecord::new(CURRENT_SCHEMA_VERSION, project.config.shard_buckets, Utc::now()),
        );
        store.commit()?;
        info!(
            root = %project.root.display(),
            version = CURRENT_SCHEMA_VERSION,
            buckets = project.config.shard_buckets,
            "initialised metadata store"
        );
        Ok(project)
    }

    /// Opens an existing project, reading `.lineage/config.yaml` when present.
    pub fn open(root: &Path) -> Result<Self, LineageError> {
        let config = LineageConfig::load(root)?;
        config.validate()?;
        let layout = StoreLayout::new(config.metadata_path(root), config.shard_buckets);
        if !layout.is_initialized() {
            return Err(LineageError::NotFound(
                ErrorInfo::new("not-initialized", "no metadata store in this project")
                    .with_context("path", layout.dir().display())
                    .with_hint("initialise the project first"),
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
            config,
            layout,
        })
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project configuration.
    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    /// Metadata directory layout.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Runs `f` under the shared lock.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&ReadView<'_>) -> Result<R, LineageError>,
    ) -> Result<R, LineageError> {
        if self.layout.journal_path().exists() {
            let _lock = self.lock_exclusive()?;
            recover(&self.layout)?;
        }
        let _lock = StoreLock::shared(&self.layout.lock_path())?;
        let store = self.open_store()?;
        ensure_current(&store)?;
        f(&ReadView {
            store: &store,
            config: &self.config,
        })
    }

    /// Runs `f` under the exclusive lock, committing when it returns `Ok`.
    ///
    /// An `Err` or a panic inside `f` discards everything it staged.
    pub fn write<R>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<R, LineageError>,
    ) -> Result<R, LineageError> {
        let _lock = self.lock_exclusive()?;
        recover(&self.layout)?;
        let mut store = self.open_store()?;
        ensure_current(&store)?;
        let result = f(&mut Transaction {
            store: &mut store,
            config: &self.config,
        });
        match result {
            Ok(value) => {
                store.commit()?;
                Ok(value)
            }
            Err(err) => {
                store.rollback();
                debug!(code = err.code(), "write session aborted");
                Err(err)
            }
        }
    }

    /// Reports how the store's schema version relates to this build.
    pub fn check_compatibility(&self) -> Result<CompatibilityReport, LineageError> {
        let _lock = StoreLock::shared(&self.layout.lock_path())?;
        let store = self.open_store()?;
        Ok(CompatibilityReport::new(
            store.schema_version(),
            CURRENT_SCHEMA_VERSION,
        ))
    }

    /// Upgrades the store to `target` with the given registry.
    pub fn migrate_with(
        &self,
        registry: &MigrationRegistry,
        target: u32,
    ) -> Result<MigrationOutcome, LineageError> {
        let _lock = self.lock_exclusive()?;
        recover(&self.layout)?;
        let mut store = self.open_store()?;
        migration::migrate(&mut store, registry, target)
    }

    /// Upgrades the store to `target` with the built-in steps.
    pub fn migrate(&self, target: u32) -> Result<MigrationOutcome, LineageError> {
        self.migrate_with(&MigrationRegistry::builtin(), target)
    }

    /// Rebuilds every index from primary records and commits the result.
    pub fn rebuild_indices(&self) -> Result<IndexReport, LineageError> {
        self.write(|tx| tx.store_mut().rebuild_indices())
    }

    /// Reports index drift without writing.
    pub fn verify_indices(&self) -> Result<IndexReport, LineageError> {
        self.read(|view| view.verify_indices())
    }

    fn codec(&self) -> RecordCodec {
        RecordCodec::new(self.config.compress_records)
    }

    fn open_store(&self) -> Result<ObjectStore, LineageError> {
        ObjectStore::open(self.layout.clone(), self.codec())
    }

    fn lock_exclusive(&self) -> Result<StoreLock, LineageError> {
        StoreLock::exclusive(
            &self.layout.lock_path(),
            self.config.lock_retries,
            self.config.lock_backoff_ms,
        )
    }
}

fn ensure_current(store: &ObjectStore) -> Result<(), LineageError> {
    let version = store.schema_version();
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }
    let hint = if version < CURRENT_SCHEMA_VERSION {
        "run migrate to upgrade the metadata store"
    } else {
        "use a newer release to open this project"
    };
    Err(LineageError::SchemaMismatch(
        ErrorInfo::new("schema-mismatch", "metadata store version differs from this build")
            .with_context("project_version", version)
            .with_context("supported", CURRENT_SCHEMA_VERSION)
            .with_hint(hint),
    ))
}
