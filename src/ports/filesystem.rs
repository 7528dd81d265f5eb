//! FileSystem port. The artifact store and state persistence run entirely
//! through this trait so tests can inject failure modes (e.g. a rename
//! that always fails) without touching a real disk differently.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::error::{FsError, FsErrorKind};

/// Options accepted by `FileSystem::write`. Atomic is the default: the
/// content lands in a temp sibling first and is renamed into place.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub atomic: bool,
    pub create_parents: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            create_parents: false,
        }
    }
}

impl WriteOptions {
    pub fn with_parents() -> Self {
        Self {
            atomic: true,
            create_parents: true,
        }
    }
}

/// Subset of `std::fs::Metadata` the core needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    pub len: u64,
    pub modified_millis: u64,
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, FsError>;
    fn write(&self, path: &Path, contents: &str, options: WriteOptions) -> Result<(), FsError>;
    fn exists(&self, path: &Path) -> bool;
    fn stat(&self, path: &Path) -> Result<FileStat, FsError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;
    fn remove_file(&self, path: &Path) -> Result<(), FsError>;
    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError>;
    /// Immediate children of `path`, sorted by name. `pattern` is a glob
    /// matched against the file name only.
    fn list(&self, path: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>, FsError>;
    fn copy(&self, from: &Path, to: &Path) -> Result<(), FsError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;
}

// ============================================================================
// Std implementation
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StdFileSystem;

/// Eight hex characters unique enough for temp-file siblings.
fn temp_suffix() -> String {
    let mut hasher = RandomState::new().build_hasher();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    hasher.write_u128(nanos);
    hasher.write_u32(std::process::id());
    format!("{:08x}", (hasher.finish() & 0xffff_ffff) as u32)
}

/// `<target>.<8-random-hex>.tmp` next to the target.
fn temp_sibling(path: &Path) -> Result<PathBuf, FsError> {
    let file_name = path.file_name().ok_or_else(|| {
        FsError::new(FsErrorKind::NotAFile, path, "path has no file name")
    })?;
    let tmp_name = format!("{}.{}.tmp", file_name.to_string_lossy(), temp_suffix());
    Ok(path.with_file_name(tmp_name))
}

impl FileSystem for StdFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let stat = std::fs::metadata(path).map_err(|e| FsError::from_io(path, &e))?;
        if stat.is_dir() {
            return Err(FsError::new(FsErrorKind::NotAFile, path, "is a directory"));
        }
        std::fs::read_to_string(path).map_err(|e| FsError::from_io(path, &e))
    }

    fn write(&self, path: &Path, contents: &str, options: WriteOptions) -> Result<(), FsError> {
        if options.create_parents
            && let Some(parent) = path.parent()
        {
            std::fs::create_dir_all(parent).map_err(|e| FsError::from_io(parent, &e))?;
        }

        if !options.atomic {
            return std::fs::write(path, contents).map_err(|e| FsError::from_io(path, &e));
        }

        let tmp = temp_sibling(path)?;
        std::fs::write(&tmp, contents).map_err(|e| FsError::from_io(&tmp, &e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            // Best-effort cleanup; the original target is untouched.
            let _ = std::fs::remove_file(&tmp);
            return Err(FsError::from_io(path, &e));
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn stat(&self, path: &Path) -> Result<FileStat, FsError> {
        let meta = std::fs::metadata(path).map_err(|e| FsError::from_io(path, &e))?;
        let modified_millis = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Ok(FileStat {
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified_millis,
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(|e| FsError::from_io(path, &e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_file(path).map_err(|e| FsError::from_io(path, &e))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_dir_all(path).map_err(|e| FsError::from_io(path, &e))
    }

    fn list(&self, path: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>, FsError> {
        let stat = std::fs::metadata(path).map_err(|e| FsError::from_io(path, &e))?;
        if !stat.is_dir() {
            return Err(FsError::new(
                FsErrorKind::NotADirectory,
                path,
                "not a directory",
            ));
        }
        let matcher = match pattern {
            Some(p) => Some(Pattern::new(p).map_err(|e| {
                FsError::new(FsErrorKind::IoError, path, format!("bad pattern: {e}"))
            })?),
            None => None,
        };

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| FsError::from_io(path, &e))? {
            let entry = entry.map_err(|e| FsError::from_io(path, &e))?;
            let name = entry.file_name();
            if let Some(m) = &matcher
                && !m.matches(&name.to_string_lossy())
            {
                continue;
            }
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        std::fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| FsError::from_io(from, &e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        std::fs::rename(from, to).map_err(|e| FsError::from_io(from, &e))
    }
}
