//! Source loading for split schema layouts.
//!
//! A root manifest may `require` other files; paths are resolved
//! relative to the requiring file.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Reads definition sources by path.
pub trait SourceLoader {
    /// Returns the contents of `path`.
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Loads sources from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Loads sources from an in-memory map, keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file.
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files
            .insert(normalize_path(path.as_ref()), contents.into());
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

/// Resolves a `require` target against the requiring file.
#[must_use]
pub fn resolve_require(from: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        return normalize_path(target);
    }
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    normalize_path(&base.join(target))
}

/// Removes `.` components and folds `..` where possible, without
/// touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_require_relative() {
        assert_eq!(
            resolve_require(Path::new("schema/Schemafile"), "users.schema"),
            PathBuf::from("schema/users.schema")
        );
        assert_eq!(
            resolve_require(Path::new("schema/Schemafile"), "./tables/../users.schema"),
            PathBuf::from("schema/users.schema")
        );
        assert_eq!(
            resolve_require(Path::new("Schemafile"), "users.schema"),
            PathBuf::from("users.schema")
        );
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::new().with_file("./a/b.schema", "x");
        assert_eq!(loader.load(Path::new("a/b.schema")).unwrap(), "x");
        assert!(loader.load(Path::new("a/c.schema")).is_err());
    }
}
