//! Normalisation of project-relative artifact paths.

use crate::errors::{ErrorInfo, LineageError};

/// Normalises a project-relative path into its canonical `a/b/c` form.
///
/// Backslashes become slashes, `.` components and repeated separators are
/// dropped. Absolute paths and `..` components are rejected because every
/// recorded artifact must live inside the working tree.
pub fn normalize_path(raw: &str) -> Result<String, LineageError> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(path_error("absolute-path", "path must be project relative", raw));
    }
    let mut parts = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(path_error(
                    "path-escapes-root",
                    "path must not contain parent components",
                    raw,
                ))
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(path_error("empty-path", "path is empty", raw));
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn path_error(code: &str, message: &str, raw: &str) -> LineageError {
    LineageError::InvalidInput(ErrorInfo::new(code, message).with_context("path", raw))
}
