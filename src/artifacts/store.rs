//! Artifact store: path-guarded, atomic file I/O under the artifact base
//! directory.
//!
//! Every path the store touches is normalized and checked against the
//! configured base; a resolved path that escapes via `..` fails with
//! `PathTraversal` before any I/O happens.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{FsError, FsErrorKind};
use crate::ports::filesystem::{FileSystem, WriteOptions};

#[derive(Clone)]
pub struct ArtifactStore {
    fs: Arc<dyn FileSystem>,
    base_dir: PathBuf,
}

/// Lexically normalize a path: fold `.`, resolve `..` against preceding
/// components. Returns `None` when `..` would climb past the start.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

impl ArtifactStore {
    pub fn new(fs: Arc<dyn FileSystem>, base_dir: PathBuf) -> Self {
        Self { fs, base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Resolve `path` (absolute, or relative to the base directory) and
    /// prove it stays inside the base directory.
    pub fn guard(&self, path: &Path) -> Result<PathBuf, FsError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        let base = normalize(&self.base_dir).unwrap_or_else(|| self.base_dir.clone());
        let resolved = normalize(&joined)
            .ok_or_else(|| FsError::new(FsErrorKind::PathTraversal, path, "escapes filesystem root"))?;
        if !resolved.starts_with(&base) {
            return Err(FsError::new(
                FsErrorKind::PathTraversal,
                path,
                format!("escapes artifact base directory {}", base.display()),
            ));
        }
        Ok(resolved)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.guard(path).map(|p| self.fs.exists(&p)).unwrap_or(false)
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<PathBuf, FsError> {
        let resolved = self.guard(path)?;
        self.fs.create_dir_all(&resolved)?;
        Ok(resolved)
    }

    /// Atomic write, creating parent directories on demand.
    pub fn write_text(&self, path: &Path, contents: &str) -> Result<PathBuf, FsError> {
        let resolved = self.guard(path)?;
        self.fs
            .write(&resolved, contents, WriteOptions::with_parents())?;
        Ok(resolved)
    }

    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<PathBuf, FsError> {
        let text = serde_json::to_string_pretty(value).map_err(|e| {
            FsError::new(FsErrorKind::IoError, path, format!("serialization failed: {e}"))
        })?;
        self.write_text(path, &text)
    }

    pub fn read_text(&self, path: &Path) -> Result<String, FsError> {
        let resolved = self.guard(path)?;
        self.fs.read_to_string(&resolved)
    }

    pub fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        let resolved = self.guard(path)?;
        self.fs.remove_file(&resolved)
    }

    /// Immediate children of a directory, optionally glob-filtered by name.
    pub fn list(&self, path: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>, FsError> {
        let resolved = self.guard(path)?;
        self.fs.list(&resolved, pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StdFileSystem;
    use tempfile::tempdir;

    fn store(base: &Path) -> ArtifactStore {
        ArtifactStore::new(Arc::new(StdFileSystem), base.to_path_buf())
    }

    #[test]
    fn test_write_and_read_inside_base() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let path = dir.path().join("run-1").join("plan").join("plan.md");

        store.write_text(&path, "# Plan").unwrap();
        assert_eq!(store.read_text(&path).unwrap(), "# Plan");
    }

    #[test]
    fn test_relative_paths_resolve_under_base() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .write_text(Path::new("run-1/requirements.txt"), "do the thing")
            .unwrap();
        assert!(dir.path().join("run-1/requirements.txt").exists());
    }

    #[test]
    fn test_dot_dot_escape_is_path_traversal() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let sneaky = dir.path().join("run-1").join("..").join("..").join("etc.txt");

        let err = store.write_text(&sneaky, "nope").unwrap_err();
        assert_eq!(err.kind, FsErrorKind::PathTraversal);
    }

    #[test]
    fn test_absolute_path_outside_base_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let err = store.read_text(Path::new("/etc/hostname")).unwrap_err();
        assert_eq!(err.kind, FsErrorKind::PathTraversal);
    }

    #[test]
    fn test_inner_dot_dot_that_stays_inside_is_allowed() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let path = dir.path().join("run-1").join("plan").join("..").join("x.md");
        store.write_text(&path, "ok").unwrap();
        assert!(dir.path().join("run-1").join("x.md").exists());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let path = dir.path().join("r").join("meta.json");
        store
            .write_json(&path, &serde_json::json!({"answer": 42}))
            .unwrap();
        let text = store.read_text(&path).unwrap();
        assert!(text.contains("\"answer\": 42"));
    }
}
