//! Durable record of which remote commits have been applied locally
//!
//! `.dynasync/index` holds one `<ts>\t<path>` line per applied commit. Lines
//! are appended and fsynced one at a time, so after a crash the index lists
//! exactly the commits whose effects reached disk. A torn trailing line is
//! dropped on open.
//!
//! `.dynasync/cursor` holds the watermark: every remote commit with a
//! timestamp at or below it is known to be applied.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::SyncError;
use crate::fsutil::{atomic_write, read_optional};

pub struct ApplyIndex {
    path: PathBuf,
    cursor_path: PathBuf,
    inner: Mutex<IndexState>,
}

struct IndexState {
    file: File,
    applied: BTreeMap<String, BTreeSet<u64>>,
    total: u64,
}

impl std::fmt::Debug for ApplyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyIndex")
            .field("path", &self.path)
            .field("total", &self.total())
            .finish()
    }
}

impl ApplyIndex {
    /// Open (creating if needed) the index at `path` and the cursor at
    /// `cursor_path`
    pub fn open(path: &Path, cursor_path: &Path) -> Result<Self, SyncError> {
        let raw = read_optional(path)?.unwrap_or_default();

        let complete = match raw.iter().rposition(|b| *b == b'\n') {
            Some(i) => i + 1,
            None => 0,
        };
        let torn = complete < raw.len();

        let mut applied: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        let mut total = 0u64;
        for (n, line) in raw[..complete].split(|b| *b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((ts, file)) => {
                    if applied.entry(file).or_default().insert(ts) {
                        total += 1;
                    }
                }
                None => warn!(line = n + 1, path = %path.display(), "skipping unreadable apply index line"),
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        if torn {
            warn!(
                path = %path.display(),
                bytes = raw.len() - complete,
                "dropping torn trailing line from apply index"
            );
            file.set_len(complete as u64)?;
            file.sync_data()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            cursor_path: cursor_path.to_path_buf(),
            inner: Mutex::new(IndexState {
                file,
                applied,
                total,
            }),
        })
    }

    /// Record that the commit `(file, ts)` has been applied.
    ///
    /// The line is on disk before this returns. Marking an already-applied
    /// pair is a no-op.
    pub fn mark_applied(&self, file: &str, ts: u64) -> Result<(), SyncError> {
        let mut state = self.inner.lock();
        if state
            .applied
            .get(file)
            .map_or(false, |set| set.contains(&ts))
        {
            return Ok(());
        }

        let line = format!("{}\t{}\n", ts, file);
        state.file.write_all(line.as_bytes())?;
        state.file.sync_data()?;

        state.applied.entry(file.to_string()).or_default().insert(ts);
        state.total += 1;
        Ok(())
    }

    /// Timestamps applied for `file`
    pub fn applied_set(&self, file: &str) -> BTreeSet<u64> {
        self.inner
            .lock()
            .applied
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_applied(&self, file: &str, ts: u64) -> bool {
        self.inner
            .lock()
            .applied
            .get(file)
            .map_or(false, |set| set.contains(&ts))
    }

    /// Newest applied timestamp for `file`
    pub fn latest(&self, file: &str) -> Option<u64> {
        self.inner
            .lock()
            .applied
            .get(file)
            .and_then(|set| set.iter().next_back().copied())
    }

    /// Newest applied timestamp across all files
    pub fn latest_overall(&self) -> Option<u64> {
        self.inner
            .lock()
            .applied
            .values()
            .filter_map(|set| set.iter().next_back().copied())
            .max()
    }

    /// Number of applied commits across all files
    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }

    /// Files with at least one applied commit
    pub fn files(&self) -> Vec<String> {
        self.inner.lock().applied.keys().cloned().collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current watermark, if one has been recorded
    pub fn watermark(&self) -> Result<Option<u64>, SyncError> {
        let Some(raw) = read_optional(&self.cursor_path)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&raw);
        match text.trim().parse::<u64>() {
            Ok(w) => Ok(Some(w)),
            Err(_) => {
                warn!(path = %self.cursor_path.display(), "ignoring unreadable cursor");
                Ok(None)
            }
        }
    }

    /// Record a new watermark
    pub fn set_watermark(&self, ts: u64) -> Result<(), SyncError> {
        atomic_write(&self.cursor_path, format!("{}\n", ts).as_bytes())
    }
}

fn parse_line(line: &[u8]) -> Option<(u64, String)> {
    let line = std::str::from_utf8(line).ok()?;
    let (ts, file) = line.split_once('\t')?;
    if file.is_empty() {
        return None;
    }
    Some((ts.parse().ok()?, file.to_string()))
}
