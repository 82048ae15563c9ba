//! Repository-relative path handling
//!
//! Every file is addressed by one normalized form: relative to the
//! repository root, `/`-separated, no `.` or `..` segments. The same form is
//! used for baseline entries, apply-index lines, and commit records, so a
//! file committed as `./docs/../a.txt` from a subdirectory and `a.txt` from
//! the root refer to the same history.

use std::path::{Component, Path, PathBuf};

use crate::error::SyncError;

/// Name of the per-repository state directory
pub const MARKER_DIR: &str = ".dynasync";

/// Resolve a path given on the command line into its repo-relative form.
///
/// `cwd` and `root` must both be absolute; relative inputs are taken
/// relative to `cwd`.
pub fn normalize_user_path(root: &Path, cwd: &Path, input: &str) -> Result<String, SyncError> {
    if input.is_empty() {
        return Err(SyncError::InvalidArgs("empty file path".to_string()));
    }

    let joined = if Path::new(input).is_absolute() {
        PathBuf::from(input)
    } else {
        cwd.join(input)
    };
    let clean = lexical_clean(&joined).ok_or_else(|| {
        SyncError::InvalidArgs(format!("path '{}' escapes the filesystem root", input))
    })?;

    let rel = clean.strip_prefix(root).map_err(|_| {
        SyncError::InvalidArgs(format!(
            "path '{}' is outside the repository at {}",
            input,
            root.display()
        ))
    })?;

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(seg) => {
                let seg = seg.to_str().ok_or_else(|| {
                    SyncError::InvalidArgs(format!("path '{}' is not valid UTF-8", input))
                })?;
                segments.push(seg.to_string());
            }
            _ => {
                return Err(SyncError::InvalidArgs(format!(
                    "path '{}' does not name a file inside the repository",
                    input
                )))
            }
        }
    }

    let path = segments.join("/");
    validate_repo_path(&path)?;
    Ok(path)
}

/// Check that a repo-relative path is in normalized form and safe to join
/// onto the repository root. Paths read back from the remote log go through
/// this too.
pub fn validate_repo_path(path: &str) -> Result<(), SyncError> {
    let invalid = |why: &str| SyncError::InvalidArgs(format!("invalid path '{}': {}", path, why));

    if path.is_empty() {
        return Err(invalid("empty"));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(invalid("must be relative and '/'-separated"));
    }
    if path.chars().any(|c| matches!(c, '\t' | '\n' | '\r' | '\0')) {
        return Err(invalid("contains a control character"));
    }
    for (i, seg) in path.split('/').enumerate() {
        if seg.is_empty() || seg == "." || seg == ".." {
            return Err(invalid("contains an empty, '.' or '..' segment"));
        }
        if i == 0 && seg == MARKER_DIR {
            return Err(invalid("points into the dynasync state directory"));
        }
    }
    Ok(())
}

/// Map a validated repo-relative path onto the filesystem
pub fn to_native(root: &Path, path: &str) -> PathBuf {
    let mut native = root.to_path_buf();
    for seg in path.split('/') {
        native.push(seg);
    }
    native
}

/// Resolve `.` and `..` without touching the filesystem
fn lexical_clean(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    Some(out)
}
