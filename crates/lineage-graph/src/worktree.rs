//! Current checksums of project files.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use lineage_core::errors::LineageError;
use lineage_core::paths::normalize_path;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Source of current checksums, keyed by project-relative path.
pub trait WorkingTree {
    /// Checksum of `path` as it is now, or `None` when it does not exist.
    fn checksum(&self, path: &str) -> Result<Option<String>, LineageError>;
}

/// Working tree backed by the project directory on disk.
///
/// Files hash to the sha256 of their content. Directories hash the sorted
/// `(relative path, file hash)` pairs of every file beneath them.
#[derive(Debug, Clone)]
pub struct FsWorkingTree {
    root: PathBuf,
}

impl FsWorkingTree {
    /// Reads checksums relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WorkingTree for FsWorkingTree {
    fn checksum(&self, path: &str) -> Result<Option<String>, LineageError> {
        let relative = normalize_path(path)?;
        let full = self.root.join(&relative);
        let metadata = match fs::metadata(&full) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LineageError::io("worktree-stat", &full, err)),
        };
        if metadata.is_dir() {
            directory_checksum(&full).map(Some)
        } else {
            file_checksum(&full).map(Some)
        }
    }
}

fn file_checksum(path: &Path) -> Result<String, LineageError> {
    let mut file = fs::File::open(path).map_err(|err| LineageError::io("worktree-read", path, err))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| LineageError::io("worktree-read", path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn directory_checksum(dir: &Path) -> Result<String, LineageError> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(dir).to_path_buf();
            LineageError::io("worktree-walk", &path, io::Error::from(err))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_checksum(entry.path())?.as_bytes());
        hasher.update([b'\n']);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Working tree held in memory. Useful for dry runs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotTree {
    files: BTreeMap<String, String>,
}

impl SnapshotTree {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the checksum of `path`.
    pub fn set(&mut self, path: impl Into<String>, checksum: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), checksum.into());
        self
    }

    /// Drops `path` from the snapshot.
    pub fn remove(&mut self, path: &str) -> &mut Self {
        self.files.remove(path);
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SnapshotTree {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(path, checksum)| (path.into(), checksum.into()))
                .collect(),
        }
    }
}

impl WorkingTree for SnapshotTree {
    fn checksum(&self, path: &str) -> Result<Option<String>, LineageError> {
        Ok(self.files.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_and_directories_hash_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data/nested")).unwrap();
        fs::write(dir.path().join("data/a.csv"), b"1,2\n").unwrap();
        fs::write(dir.path().join("data/nested/b.csv"), b"3,4\n").unwrap();
        let tree = FsWorkingTree::new(dir.path());

        let file = tree.checksum("data/a.csv").unwrap().unwrap();
        assert_eq!(file.len(), 64);
        let first = tree.checksum("data").unwrap().unwrap();
        assert_eq!(tree.checksum("data/").unwrap().unwrap(), first);

        fs::write(dir.path().join("data/nested/b.csv"), b"3,5\n").unwrap();
        assert_ne!(tree.checksum("data").unwrap().unwrap(), first);
        assert_eq!(tree.checksum("data/missing.csv").unwrap(), None);
    }

    #[test]
    fn paths_outside_the_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FsWorkingTree::new(dir.path());
        assert_eq!(tree.checksum("../etc/passwd").unwrap_err().code(), "path-escapes-root");
    }

    #[test]
    fn file_checksum_is_the_sha256_of_its_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("abc.txt"), b"abc").unwrap();
        let tree = FsWorkingTree::new(dir.path());
        assert_eq!(
            tree.checksum("abc.txt").unwrap().unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
