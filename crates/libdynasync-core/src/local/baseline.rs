//! Last-known committed content of each tracked file
//!
//! One file per tracked path under `.dynasync/baseline/`, named by the hex
//! encoding of the normalized repo-relative path. Hex keeps nested paths flat
//! and sidesteps any filename the host filesystem would reject.

use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::fsutil::{atomic_write, read_optional};
use crate::types::validate_repo_path;

#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, file: &str) -> PathBuf {
        self.dir.join(hex::encode(file.as_bytes()))
    }

    /// Baseline content for `file`, or `None` if the file was never
    /// committed or applied here
    pub fn read(&self, file: &str) -> Result<Option<Vec<u8>>, SyncError> {
        read_optional(&self.entry_path(file))
    }

    /// Replace the baseline for `file` atomically
    pub fn write(&self, file: &str, content: &[u8]) -> Result<(), SyncError> {
        atomic_write(&self.entry_path(file), content)
    }

    /// All tracked paths, sorted
    pub fn tracked(&self) -> Result<Vec<String>, SyncError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Skips leftover temp files from an interrupted write
            let Ok(bytes) = hex::decode(name) else { continue };
            let Ok(path) = String::from_utf8(bytes) else { continue };
            if validate_repo_path(&path).is_ok() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_absent_until_written() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline"));

        assert_eq!(store.read("a.txt").unwrap(), None);
        assert!(store.tracked().unwrap().is_empty());

        store.write("a.txt", b"").unwrap();
        // An empty baseline is distinct from no baseline
        assert_eq!(store.read("a.txt").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_nested_paths_are_tracked() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline"));

        store.write("docs/guide/intro.md", b"intro").unwrap();
        store.write("a.txt", b"a").unwrap();
        store.write("a.txt", b"a2").unwrap();

        assert_eq!(
            store.tracked().unwrap(),
            vec!["a.txt".to_string(), "docs/guide/intro.md".to_string()]
        );
        assert_eq!(store.read("a.txt").unwrap(), Some(b"a2".to_vec()));
    }

    #[test]
    fn test_foreign_entries_are_ignored() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline"));
        store.write("a.txt", b"a").unwrap();
        std::fs::write(store.dir().join(".tmpXYZ"), b"junk").unwrap();

        assert_eq!(store.tracked().unwrap(), vec!["a.txt".to_string()]);
    }
}
