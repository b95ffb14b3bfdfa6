//! Project configuration loaded from `.lineage/config.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, LineageError};
use crate::model::Agent;

/// Directory holding Lineage state, relative to the project root.
pub const STATE_DIR: &str = ".lineage";
/// Configuration file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.yaml";

/// YAML-configurable store and engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageConfig {
    /// Metadata directory, relative to the project root.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    /// Number of shard buckets per object kind and index.
    #[serde(default = "default_shard_buckets")]
    pub shard_buckets: u16,
    /// Whether records are gzip-compressed on disk.
    #[serde(default = "default_compress_records")]
    pub compress_records: bool,
    /// Attempts to take the write lock before giving up.
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
    /// Initial backoff between lock attempts in milliseconds.
    #[serde(default = "default_lock_backoff_ms")]
    pub lock_backoff_ms: u64,
    /// Agent recorded when an execution does not name one.
    #[serde(default = "default_agent")]
    pub default_agent: Agent,
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("metadata")
}

fn default_shard_buckets() -> u16 {
    64
}

fn default_compress_records() -> bool {
    true
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_backoff_ms() -> u64 {
    25
}

fn default_agent() -> Agent {
    Agent::Software {
        name: "lineage".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    }
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            metadata_dir: default_metadata_dir(),
            shard_buckets: default_shard_buckets(),
            compress_records: default_compress_records(),
            lock_retries: default_lock_retries(),
            lock_backoff_ms: default_lock_backoff_ms(),
            default_agent: default_agent(),
        }
    }
}

impl LineageConfig {
    /// Parses a configuration document and validates it.
    pub fn from_yaml(raw: &str) -> Result<Self, LineageError> {
        let config: LineageConfig = serde_yaml::from_str(raw).map_err(|err| {
            LineageError::InvalidInput(ErrorInfo::new("invalid-config", err.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `<root>/.lineage/config.yaml`, falling back to defaults when absent.
    pub fn load(project_root: &Path) -> Result<Self, LineageError> {
        let path = Self::path_in(project_root);
        match fs::read_to_string(&path) {
            Ok(raw) => Self::from_yaml(&raw).map_err(|err| err.with_context("path", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(LineageError::io("config-read", &path, err)),
        }
    }

    /// Writes the configuration to `<root>/.lineage/config.yaml`.
    pub fn save(&self, project_root: &Path) -> Result<(), LineageError> {
        let path = Self::path_in(project_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| LineageError::io("config-write", parent, err))?;
        }
        let raw = serde_yaml::to_string(self).map_err(|err| {
            LineageError::InvalidInput(ErrorInfo::new("invalid-config", err.to_string()))
        })?;
        fs::write(&path, raw).map_err(|err| LineageError::io("config-write", &path, err))
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), LineageError> {
        if !(1..=256).contains(&self.shard_buckets) {
            return Err(LineageError::InvalidInput(
                ErrorInfo::new("invalid-config", "shard_buckets must be within 1..=256")
                    .with_context("shard_buckets", self.shard_buckets),
            ));
        }
        if self.metadata_dir.is_absolute() {
            return Err(LineageError::InvalidInput(
                ErrorInfo::new("invalid-config", "metadata_dir must be project relative")
                    .with_context("metadata_dir", self.metadata_dir.display()),
            ));
        }
        Ok(())
    }

    /// Absolute metadata directory for a project.
    pub fn metadata_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.metadata_dir)
    }

    fn path_in(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR).join(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_use_field_defaults() {
        let config = LineageConfig::from_yaml("shard_buckets: 16\n").unwrap();
        assert_eq!(config.shard_buckets, 16);
        assert!(config.compress_records);
        assert_eq!(config.lock_retries, 5);
        assert_eq!(config.metadata_dir, PathBuf::from(".lineage/metadata"));
    }

    #[test]
    fn bucket_count_is_bounded() {
        let err = LineageConfig::from_yaml("shard_buckets: 0\n").unwrap_err();
        assert_eq!(err.code(), "invalid-config");
        assert!(LineageConfig::from_yaml("shard_buckets: 257\n").is_err());
    }

    #[test]
    fn load_falls_back_to_defaults_and_reads_saved_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LineageConfig::load(dir.path()).unwrap(), LineageConfig::default());

        let config = LineageConfig {
            compress_records: false,
            lock_retries: 2,
            ..LineageConfig::default()
        };
        config.save(dir.path()).unwrap();
        assert_eq!(LineageConfig::load(dir.path()).unwrap(), config);
    }
}
