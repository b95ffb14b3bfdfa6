//! On-disk layout of a metadata directory.

use std::fs;
use std::path::{Path, PathBuf};

use lineage_core::errors::LineageError;
use lineage_core::ids::{bucket_name, bucket_of, ObjectId};
use lineage_core::record::RecordKind;

const ROOT_FILE: &str = "root";
const OBJECTS_DIR: &str = "objects";
const INDICES_DIR: &str = "indices";
const TMP_DIR: &str = "tmp";
const JOURNAL_FILE: &str = "journal";
const LOCK_FILE: &str = "lock";

/// Resolves every path the store reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    dir: PathBuf,
    buckets: u16,
}

impl StoreLayout {
    /// Creates a layout rooted at the metadata directory.
    pub fn new(dir: impl Into<PathBuf>, buckets: u16) -> Self {
        Self {
            dir: dir.into(),
            buckets: buckets.max(1),
        }
    }

    /// Metadata directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shard bucket count.
    pub fn buckets(&self) -> u16 {
        self.buckets
    }

    pub(crate) fn with_buckets(&self, buckets: u16) -> Self {
        Self::new(self.dir.clone(), buckets)
    }

    /// Path of the root record.
    pub fn root_path(&self) -> PathBuf {
        self.dir.join(ROOT_FILE)
    }

    /// Directory holding all records of one kind.
    pub fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.dir.join(OBJECTS_DIR).join(kind.as_str())
    }

    /// Path of one primary record.
    pub fn object_path(&self, kind: RecordKind, id: &ObjectId) -> PathBuf {
        self.kind_dir(kind)
            .join(bucket_name(bucket_of(id.as_str(), self.buckets)))
            .join(id.as_str())
    }

    /// Root of all index shards.
    pub fn indices_dir(&self) -> PathBuf {
        self.dir.join(INDICES_DIR)
    }

    /// Resolves a shard location relative to the indices directory.
    pub fn index_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.indices_dir(), |path, part| path.join(part))
    }

    /// Scratch directory for in-flight commits.
    pub fn tmp_dir(&self) -> PathBuf {
        self.dir.join(TMP_DIR)
    }

    /// Commit journal.
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Advisory lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Whether a root record exists.
    pub fn is_initialized(&self) -> bool {
        self.root_path().is_file()
    }

    /// Creates the fixed directories.
    pub fn ensure_dirs(&self) -> Result<(), LineageError> {
        for dir in [
            self.dir.clone(),
            self.dir.join(OBJECTS_DIR),
            self.indices_dir(),
            self.tmp_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|err| LineageError::io("layout-create", &dir, err))?;
        }
        Ok(())
    }

    /// Path relative to the metadata directory, with forward slashes.
    pub(crate) fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.dir).unwrap_or(path);
        relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub(crate) fn absolute(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.dir.clone(), |path, part| path.join(part))
    }
}
