//! Checkpoint store for resumable batch runs.
//!
//! Page-range units of work are idempotent: a range already marked complete
//! with non-empty output is skipped on rerun unless the caller forces a redo.
//! The store replaces marker files with an explicit, inspectable record keyed
//! by page range.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MergeError, MergeResult};

/// An inclusive page range identifying one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageRange {
    /// First page of the unit (1-based).
    pub start: u32,
    /// Last page of the unit, inclusive.
    pub end: u32,
}

impl PageRange {
    /// Creates a range, normalizing reversed bounds.
    pub fn new(start: u32, end: u32) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    fn key(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

/// One completed unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointEntry {
    start: u32,
    end: u32,
    /// Number of lines in the unit's output. Zero-output units are never
    /// recorded as complete.
    line_count: u64,
}

/// Persistent record of completed page ranges, JSON-file backed.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    entries: BTreeMap<String, CheckpointEntry>,
}

impl CheckpointStore {
    /// Opens the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> MergeResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let data = fs::read_to_string(&path)?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the given range is already recorded as complete.
    pub fn is_complete(&self, range: PageRange) -> bool {
        self.entries.contains_key(&range.key())
    }

    /// Whether the given range should be processed.
    ///
    /// Complete ranges are skipped unless `force_redo` is set.
    pub fn should_process(&self, range: PageRange, force_redo: bool) -> bool {
        force_redo || !self.is_complete(range)
    }

    /// Marks a range complete and persists the store.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::InvalidInput`] for `line_count == 0`: an empty
    /// output must not shadow a rerun.
    pub fn mark_complete(&mut self, range: PageRange, line_count: u64) -> MergeResult<()> {
        if line_count == 0 {
            return Err(MergeError::InvalidInput {
                message: format!(
                    "refusing to checkpoint pages {}-{} with empty output",
                    range.start, range.end
                ),
            });
        }
        self.entries.insert(
            range.key(),
            CheckpointEntry {
                start: range.start,
                end: range.end,
                line_count,
            },
        );
        self.persist()
    }

    /// Removes the record for a range, forcing it to be reprocessed.
    pub fn clear(&mut self, range: PageRange) -> MergeResult<()> {
        self.entries.remove(&range.key());
        self.persist()
    }

    /// All completed ranges, in key order.
    pub fn completed_ranges(&self) -> Vec<PageRange> {
        self.entries
            .values()
            .map(|e| PageRange::new(e.start, e.end))
            .collect()
    }

    fn persist(&self) -> MergeResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let mut store = CheckpointStore::open(&path).unwrap();
        let range = PageRange::new(1, 50);
        assert!(store.should_process(range, false));
        store.mark_complete(range, 1200).unwrap();
        assert!(store.is_complete(range));
        assert!(!store.should_process(range, false));
        assert!(store.should_process(range, true));

        // Reopen from disk.
        let store = CheckpointStore::open(&path).unwrap();
        assert!(store.is_complete(range));
        assert!(!store.is_complete(PageRange::new(51, 100)));
    }

    #[test]
    fn empty_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path().join("cp.json")).unwrap();
        let err = store.mark_complete(PageRange::new(1, 1), 0);
        assert!(err.is_err());
        assert!(!store.is_complete(PageRange::new(1, 1)));
    }

    #[test]
    fn clear_forces_reprocess() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path().join("cp.json")).unwrap();
        let range = PageRange::new(10, 20);
        store.mark_complete(range, 5).unwrap();
        store.clear(range).unwrap();
        assert!(store.should_process(range, false));
    }

    #[test]
    fn reversed_bounds_normalize() {
        assert_eq!(PageRange::new(9, 3), PageRange::new(3, 9));
    }
}
