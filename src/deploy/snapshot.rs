//! Single-slot directory snapshots used for rollback.
//!
//! Each target has at most one live snapshot. Capturing replaces it, and
//! restoring reads it without consuming it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::Level;
use thiserror::Error;

use super::patterns::{ExclusionPatternSet, is_implicitly_excluded};
use super::retry::{OperationOutcome, RetryPolicy};
use super::tree::{copy_tree, remove_path};
use crate::events::EventSink;

/// Errors returned by snapshot operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The directory to capture does not exist.
    #[error("snapshot source does not exist: {0}")]
    SourceMissing(PathBuf),
    /// There is no snapshot to restore from.
    #[error("no snapshot at {0}")]
    BackupMissing(PathBuf),
    /// Copying kept failing after every retry.
    #[error("{operation} of {path} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// A captured copy of a deployment directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Where the snapshot lives.
    pub path: PathBuf,
    /// The directory it was taken from.
    pub source: PathBuf,
    pub created_at: SystemTime,
    /// Files, directories and symlinks copied.
    pub entries: u64,
}

/// Creates and restores snapshots under a retry policy.
pub struct SnapshotStore {
    policy: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl SnapshotStore {
    pub fn new(policy: RetryPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self { policy, sink }
    }

    /// Copy `source` into `backup`, replacing any snapshot already there.
    ///
    /// Paths excluded by `exclusions` (and the implicit metadata exclusions)
    /// are skipped. `source` is only read.
    pub fn capture(
        &self,
        source: &Path,
        backup: &Path,
        exclusions: &ExclusionPatternSet,
    ) -> Result<Snapshot, SnapshotError> {
        let outcome = if !source.is_dir() {
            OperationOutcome::FailedFatal(io::Error::new(
                io::ErrorKind::NotFound,
                "source directory missing",
            ))
        } else {
            self.policy
                .execute("capture snapshot", self.sink.as_ref(), || {
                    remove_path(backup)?;
                    copy_tree(source, backup, &|rel: &Path, is_dir: bool| {
                        exclusions.is_excluded(rel, is_dir)
                    })
                })
        };

        let entries = outcome.into_result(|attempts, source_err| match attempts {
            None => SnapshotError::SourceMissing(source.to_path_buf()),
            Some(attempts) => SnapshotError::Exhausted {
                operation: "capture",
                path: source.to_path_buf(),
                attempts,
                source: source_err,
            },
        })?;

        self.sink.record(
            Level::Info,
            &format!(
                "snapshot of {} captured at {} ({} entries, {} patterns)",
                source.display(),
                backup.display(),
                entries,
                exclusions.len()
            ),
        );

        Ok(Snapshot {
            path: backup.to_path_buf(),
            source: source.to_path_buf(),
            created_at: SystemTime::now(),
            entries,
        })
    }

    /// Replace `destination` with the contents of `backup`.
    ///
    /// Only the implicit exclusions apply: metadata and ignore files are
    /// regenerated by the next fetch, not restored.
    pub fn restore(&self, backup: &Path, destination: &Path) -> Result<(), SnapshotError> {
        self.restore_filtered(backup, destination, &ExclusionPatternSet::empty())
    }

    /// Like [`restore`](Self::restore), additionally skipping paths excluded
    /// by the pattern set recorded when the snapshot was captured.
    pub fn restore_filtered(
        &self,
        backup: &Path,
        destination: &Path,
        exclusions: &ExclusionPatternSet,
    ) -> Result<(), SnapshotError> {
        if !backup.is_dir() {
            return Err(SnapshotError::BackupMissing(backup.to_path_buf()));
        }

        let outcome = self
            .policy
            .execute("restore snapshot", self.sink.as_ref(), || {
                remove_path(destination)?;
                copy_tree(backup, destination, &|rel: &Path, is_dir: bool| {
                    is_implicitly_excluded(rel) || exclusions.is_excluded(rel, is_dir)
                })
            });

        let entries = outcome.into_result(|attempts, source| SnapshotError::Exhausted {
            operation: "restore",
            path: destination.to_path_buf(),
            attempts: attempts.unwrap_or(0),
            source,
        })?;

        self.sink.record(
            Level::Info,
            &format!(
                "restored {} from {} ({} entries)",
                destination.display(),
                backup.display(),
                entries
            ),
        );
        Ok(())
    }

    /// Describe the live snapshot at `backup`, if any.
    pub fn existing(&self, backup: &Path, source: &Path) -> Option<Snapshot> {
        let meta = std::fs::metadata(backup).ok()?;
        if !meta.is_dir() {
            return None;
        }
        Some(Snapshot {
            path: backup.to_path_buf(),
            source: source.to_path_buf(),
            created_at: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            entries: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testutil::read_tree;
    use crate::events::MemorySink;
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store() -> (SnapshotStore, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let store = SnapshotStore::new(RetryPolicy::new(3, Duration::ZERO), sink.clone());
        (store, sink)
    }

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("public/css")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::write(root.join("index.html"), "<h1>v1</h1>").unwrap();
        fs::write(root.join("public/css/site.css"), "body{}").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(root.join(".gitignore"), "cache/\n*.log\n").unwrap();
        fs::write(root.join("cache/blob"), "tmp").unwrap();
        fs::write(root.join("server.log"), "noise").unwrap();
    }

    #[test]
    fn capture_skips_excluded_and_metadata() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        populate(&source);
        let backup = dir.path().join("backup/app");
        let exclusions = ExclusionPatternSet::load(&source).unwrap();

        let (store, _sink) = store();
        let snapshot = store.capture(&source, &backup, &exclusions).unwrap();

        assert_eq!(snapshot.path, backup);
        assert_eq!(snapshot.source, source);
        let files = read_tree(&backup);
        let names: Vec<_> = files.keys().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(names, ["index.html", "public/css/site.css"]);
    }

    #[test]
    fn capture_drops_metadata_without_ignore_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        fs::create_dir_all(source.join(".git/refs")).unwrap();
        fs::write(source.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(source.join("index.html"), "<h1>v1</h1>").unwrap();
        let backup = dir.path().join("bk");
        let exclusions = ExclusionPatternSet::load(&source).unwrap();
        assert!(exclusions.is_empty());

        let (store, _sink) = store();
        store.capture(&source, &backup, &exclusions).unwrap();

        assert!(!backup.join(".git").exists());
        assert!(backup.join("index.html").exists());
    }

    #[test]
    fn capture_leaves_source_untouched() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        populate(&source);
        let before = read_tree(&source);

        let (store, _sink) = store();
        store
            .capture(&source, &dir.path().join("bk"), &ExclusionPatternSet::empty())
            .unwrap();

        assert_eq!(read_tree(&source), before);
    }

    #[test]
    fn capture_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        let backup = dir.path().join("bk");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&backup).unwrap();
        fs::write(backup.join("stale.txt"), "old snapshot").unwrap();
        fs::write(source.join("fresh.txt"), "new").unwrap();

        let (store, _sink) = store();
        store
            .capture(&source, &backup, &ExclusionPatternSet::empty())
            .unwrap();

        assert!(!backup.join("stale.txt").exists());
        assert!(backup.join("fresh.txt").exists());
    }

    #[test]
    fn capture_missing_source_is_fatal_without_retries() {
        let dir = tempdir().unwrap();
        let (store, sink) = store();

        let result = store.capture(
            &dir.path().join("nope"),
            &dir.path().join("bk"),
            &ExclusionPatternSet::empty(),
        );

        assert!(matches!(result, Err(SnapshotError::SourceMissing(_))));
        assert!(sink.matching("attempt").is_empty());
    }

    #[test]
    fn capture_exhausts_retries_when_backup_cannot_be_written() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("f"), "x").unwrap();
        // A regular file as the backup parent makes every attempt fail.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a dir").unwrap();

        let (store, sink) = store();
        let result = store.capture(&source, &blocker.join("bk"), &ExclusionPatternSet::empty());

        match result {
            Err(SnapshotError::Exhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "capture");
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected Exhausted error, got: {:?}", other),
        }
        assert_eq!(sink.matching("capture snapshot: attempt").len(), 3);
    }

    #[test]
    fn restore_round_trip_is_lossless_for_kept_paths() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        populate(&source);
        let exclusions = ExclusionPatternSet::load(&source).unwrap();
        let backup = dir.path().join("bk");

        let (store, _sink) = store();
        store.capture(&source, &backup, &exclusions).unwrap();

        let expected: BTreeMap<_, _> = read_tree(&source)
            .into_iter()
            .filter(|(rel, _)| !exclusions.is_excluded(rel, false))
            .collect();

        fs::write(source.join("index.html"), "<h1>broken</h1>").unwrap();
        fs::write(source.join("new.txt"), "partial deploy").unwrap();

        store.restore_filtered(&backup, &source, &exclusions).unwrap();
        assert_eq!(read_tree(&source), expected);
    }

    #[test]
    fn restore_creates_missing_destination() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("bk");
        fs::create_dir_all(backup.join("nested")).unwrap();
        fs::write(backup.join("nested/a.txt"), "a").unwrap();

        let (store, _sink) = store();
        let dest = dir.path().join("dest");
        store.restore(&backup, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("nested/a.txt")).unwrap(), "a");
        assert!(backup.join("nested/a.txt").exists());
    }

    #[test]
    fn restore_never_writes_metadata_or_ignore_file() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("bk");
        fs::create_dir_all(backup.join(".git")).unwrap();
        fs::write(backup.join(".git/HEAD"), "x").unwrap();
        fs::write(backup.join(".gitignore"), "x").unwrap();
        fs::write(backup.join("app.txt"), "x").unwrap();

        let (store, _sink) = store();
        let dest = dir.path().join("dest");
        store.restore(&backup, &dest).unwrap();

        assert!(dest.join("app.txt").exists());
        assert!(!dest.join(".git").exists());
        assert!(!dest.join(".gitignore").exists());
    }

    #[test]
    fn restore_without_snapshot_fails() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep"), "x").unwrap();

        let (store, _sink) = store();
        let result = store.restore(&dir.path().join("missing"), &dest);

        assert!(matches!(result, Err(SnapshotError::BackupMissing(_))));
        assert!(dest.join("keep").exists());
    }

    #[test]
    fn existing_reports_live_snapshot_only() {
        let dir = tempdir().unwrap();
        let (store, _sink) = store();
        let backup = dir.path().join("bk");
        assert!(store.existing(&backup, dir.path()).is_none());

        fs::create_dir_all(&backup).unwrap();
        let snapshot = store.existing(&backup, dir.path()).unwrap();
        assert_eq!(snapshot.path, backup);
    }
}
