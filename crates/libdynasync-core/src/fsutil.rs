//! Crash-safe file writes

use std::io::Write;
use std::path::Path;

#[cfg(unix)]
use std::fs::Permissions;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use tempfile::Builder;

use crate::error::SyncError;

/// Replace `path` with `data` atomically.
///
/// The temp file lives in the target's directory so the final rename stays
/// on one filesystem; readers see either the old or the new content. Missing
/// parent directories are created.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SyncError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // An existing file keeps its mode; a new one gets what a plain create
    // would give under the process umask
    let existing = match std::fs::metadata(path) {
        Ok(meta) => Some(meta.permissions()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let mut builder = Builder::new();
    #[cfg(unix)]
    if existing.is_none() {
        builder.permissions(Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(parent)?;
    if let Some(perms) = existing {
        tmp.as_file().set_permissions(perms)?;
    }
    tmp.write_all(data)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| SyncError::Io(e.error))?;
    Ok(())
}

/// Read a file, mapping "does not exist" to `None`
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SyncError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("file.txt");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_keeps_existing_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.sh");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();

        atomic_write(&path, b"#!/bin/sh\necho hi\n").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_new_file_matches_plain_create() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        std::fs::write(&plain, b"x").unwrap();

        let path = dir.path().join("written.txt");
        atomic_write(&path, b"x").unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), mode(&plain));
    }

    #[test]
    fn test_read_optional() {
        let dir = tempdir().unwrap();
        assert_eq!(read_optional(&dir.path().join("nope")).unwrap(), None);

        let path = dir.path().join("yes");
        std::fs::write(&path, b"x").unwrap();
        assert_eq!(read_optional(&path).unwrap(), Some(b"x".to_vec()));
    }
}
