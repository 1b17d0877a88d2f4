use std::fs::Metadata;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// One filesystem entry below an input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
}

/// Walks every root (recursing into directories, not following symlinks) and lists its entries.
///
/// # Errors
///
/// Returns [`Error::Io`] if a root or one of its descendants cannot be read.
pub fn list_entries(roots: &[PathBuf]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for root in roots {
        for item in WalkDir::new(root).follow_links(false) {
            let item = item.map_err(|e| Error::from(std::io::Error::from(e)))?;
            let meta = item.metadata().map_err(|e| Error::from(std::io::Error::from(e)))?;
            entries.push(entry(item.path(), &meta));
        }
    }
    Ok(entries)
}

/// Sum of the sizes of the regular files in `entries`.
pub fn total_size(entries: &[Entry]) -> u64 {
    entries.iter().filter(|entry| !entry.is_dir).map(|entry| entry.size).sum()
}

fn entry(path: &Path, meta: &Metadata) -> Entry {
    let is_dir = meta.is_dir();
    Entry { path: path.to_path_buf(), size: if meta.is_file() { meta.len() } else { 0 }, mode: mode(meta), is_dir }
}

#[cfg(unix)]
fn mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_lists_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();
        fs::write(root.join("nested/b.txt"), b"world!!").unwrap();

        let entries = list_entries(std::slice::from_ref(&root)).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries.iter().filter(|e| e.is_dir).count(), 2);
        assert_eq!(total_size(&entries), 12);
    }

    #[test]
    fn test_multiple_roots_are_summed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, vec![0u8; 100]).unwrap();
        fs::write(&b, vec![0u8; 28]).unwrap();

        let entries = list_entries(&[a, b]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(total_size(&entries), 128);
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(list_entries(&[dir.path().join("missing")]), Err(Error::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, b"#!/bin/sh").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o750)).unwrap();

        let entries = list_entries(&[file]).unwrap();
        assert_eq!(entries[0].mode & 0o777, 0o750);
    }
}
