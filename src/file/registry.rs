use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashSet;
use tracing::debug;

use crate::config::TEMP_PREFIX;
use crate::error::Result;

/// Process-wide bookkeeping of temporary files and directories.
///
/// Every path is registered individually so that one session can clean up
/// its own resources without touching those of a concurrent session.
/// Removal is idempotent: a path that is already gone is not an error.
#[derive(Debug, Clone, Default)]
pub struct TempRegistry {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers an empty, uniquely named directory inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the directory cannot be created.
    pub fn create_dir(&self, dir: &Path) -> Result<PathBuf> {
        let path = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir_in(dir)?.keep();
        self.register(&path);
        Ok(path)
    }

    /// Creates and registers an empty, uniquely named file inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be created.
    pub fn create_file(&self, dir: &Path) -> Result<(fs::File, PathBuf)> {
        let (file, path) = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?.keep().map_err(|e| e.error)?;
        self.register(&path);
        Ok((file, path))
    }

    pub fn register(&self, path: &Path) {
        debug!(path = %path.display(), "registered temporary resource");
        self.lock().insert(path.to_path_buf());
    }

    /// Forgets `path` without touching the filesystem.
    pub fn release(&self, path: &Path) -> bool {
        self.lock().remove(path)
    }

    /// Deletes `path` (file or directory tree) and forgets it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if deletion fails for any reason other than the path being gone.
    pub fn remove(&self, path: &Path) -> Result<()> {
        self.release(path);
        remove_path(path)?;
        Ok(())
    }

    /// Deletes every registered path, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns the first failure after every path has been attempted.
    pub fn remove_all(&self) -> Result<()> {
        let paths: Vec<PathBuf> = self.lock().drain().collect();
        let mut first = None;
        for path in paths {
            if let Err(e) = remove_path(&path) {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "removed temporary resource");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_dir_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();
        let staging = registry.create_dir(dir.path()).unwrap();

        assert!(staging.is_dir());
        assert!(staging.file_name().unwrap().to_string_lossy().starts_with(TEMP_PREFIX));
        assert!(registry.contains(&staging));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();
        let (_file, path) = registry.create_file(dir.path()).unwrap();

        registry.remove(&path).unwrap();
        assert!(!path.exists());
        registry.remove(&path).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_all_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();
        let staging = registry.create_dir(dir.path()).unwrap();
        fs::write(staging.join("inner.txt"), b"data").unwrap();
        let (_file, path) = registry.create_file(dir.path()).unwrap();
        registry.register(&dir.path().join("never-created"));

        registry.remove_all().unwrap();
        assert!(!staging.exists());
        assert!(!path.exists());
        assert!(registry.is_empty());
        registry.remove_all().unwrap();
    }

    #[test]
    fn test_release_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();
        let (_file, path) = registry.create_file(dir.path()).unwrap();

        assert!(registry.release(&path));
        registry.remove_all().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_clones_share_registry() {
        let registry = TempRegistry::new();
        let other = registry.clone();
        other.register(Path::new("/tmp/shared"));
        assert!(registry.contains(Path::new("/tmp/shared")));
    }
}
