//! Deployment state machine.
//!
//! A deploy runs `Validating → Backing Up → Staging → Swapping → Succeeded`.
//! Failures after a snapshot exists go through `Rolling Back`, ending in
//! `RolledBack` when the restore works and `Failed` when it does not.
//! Everything is sequential; the only waiting happens inside retries.

use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::Level;
use thiserror::Error;

use super::git::{GitError, SourceFetcher, current_branch};
use super::lock::DeployLock;
use super::paths::DeployPaths;
use super::patterns::{ExclusionPatternSet, is_metadata_path};
use super::retry::{OperationOutcome, RetryPolicy};
use super::snapshot::{Snapshot, SnapshotStore};
use super::tree::{copy_tree, is_non_empty_dir, remove_dir_contents, remove_path};
use crate::events::EventSink;
use crate::types::{Credential, DeploymentTarget};

/// Where a deployment currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Validating,
    BackingUp,
    Staging,
    Swapping,
    Succeeded,
    RollingBack,
    RolledBack,
    Failed,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployState::Idle => "idle",
            DeployState::Validating => "validating",
            DeployState::BackingUp => "backing up",
            DeployState::Staging => "staging",
            DeployState::Swapping => "swapping",
            DeployState::Succeeded => "succeeded",
            DeployState::RollingBack => "rolling back",
            DeployState::RolledBack => "rolled back",
            DeployState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a step of the deployment failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// Pre-flight checks failed; nothing was touched.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The snapshot could not be taken; nothing was touched.
    #[error("backup failed: {0}")]
    BackupFailed(String),
    #[error("branch '{0}' does not exist on the remote")]
    BranchNotFound(String),
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("swap failed: {0}")]
    SwapFailed(String),
    #[error("restore failed: {0}")]
    RestoreFailed(String),
    /// An interrupt arrived at a safe point.
    #[error("interrupted before {0}")]
    Interrupted(String),
}

fn rollback_suffix(restore: &Option<DeployError>) -> String {
    match restore {
        Some(err) => format!("; rollback also failed ({}), manual recovery required", err),
        None => String::new(),
    }
}

/// How a deployment ended when it did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployFailure {
    /// Stopped before any destructive step.
    #[error("deployment aborted: {0}")]
    Aborted(DeployError),
    /// The destination was restored from its snapshot.
    #[error("deployment failed, rolled back successfully: {cause}")]
    RolledBack { cause: DeployError },
    /// No recovery happened, either because there was nothing to restore
    /// from or because the restore itself failed.
    #[error("deployment failed: {cause}{}", rollback_suffix(.restore))]
    Unrecoverable {
        cause: DeployError,
        restore: Option<DeployError>,
    },
}

impl DeployFailure {
    /// The error that started the failure.
    pub fn cause(&self) -> &DeployError {
        match self {
            DeployFailure::Aborted(cause) => cause,
            DeployFailure::RolledBack { cause } => cause,
            DeployFailure::Unrecoverable { cause, .. } => cause,
        }
    }

    /// True when the destination is in an unknown condition.
    pub fn requires_manual_recovery(&self) -> bool {
        match self {
            DeployFailure::Unrecoverable { cause, restore } => {
                restore.is_some() || matches!(cause, DeployError::RestoreFailed(_))
            }
            _ => false,
        }
    }

    /// Process exit code: 1 aborted, 2 rolled back, 3 unrecoverable.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployFailure::Aborted(_) => 1,
            DeployFailure::RolledBack { .. } => 2,
            DeployFailure::Unrecoverable { .. } => 3,
        }
    }
}

/// A successful deployment.
#[derive(Debug, Clone)]
pub struct Deployed {
    pub destination: PathBuf,
    /// Snapshot of the previous deployment, if there was one.
    pub snapshot: Option<Snapshot>,
    /// Entries written into the destination.
    pub entries: u64,
}

/// Snapshot plus the patterns it was captured with.
struct Protection {
    snapshot: Snapshot,
    exclusions: ExclusionPatternSet,
}

/// Sequences fetch, backup, swap and rollback for one target at a time.
pub struct Orchestrator<F: SourceFetcher> {
    paths: DeployPaths,
    fetcher: F,
    snapshots: SnapshotStore,
    policy: RetryPolicy,
    sink: Arc<dyn EventSink>,
    interrupted: Arc<AtomicBool>,
    state: Cell<DeployState>,
}

impl<F: SourceFetcher> Orchestrator<F> {
    pub fn new(paths: DeployPaths, fetcher: F, policy: RetryPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self {
            snapshots: SnapshotStore::new(policy, sink.clone()),
            paths,
            fetcher,
            policy,
            sink,
            interrupted: Arc::new(AtomicBool::new(false)),
            state: Cell::new(DeployState::Idle),
        }
    }

    /// Share an interrupt flag (set from a signal handler). It is only
    /// consulted before destructive steps begin.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// State of the most recent run.
    pub fn state(&self) -> DeployState {
        self.state.get()
    }

    /// Deploy `target.branch` into `target.destination`.
    pub fn deploy(
        &self,
        target: &DeploymentTarget,
        credential: &Credential,
    ) -> Result<Deployed, DeployFailure> {
        self.transition(target, DeployState::Validating);
        let _lock = self.preflight(target).map_err(|e| self.abort(target, e))?;

        if let Ok(Some(branch)) = current_branch(&target.destination) {
            self.emit(
                Level::Info,
                &format!("{}: destination is a checkout of branch '{}'", target, branch),
            );
        }

        if !self
            .fetcher
            .branch_exists(&target.locator, &target.branch, credential)
        {
            let err = DeployError::BranchNotFound(target.branch.to_string());
            return Err(self.abort(target, err));
        }

        self.check_interrupt("backing up")
            .map_err(|e| self.abort(target, e))?;

        let protection = if is_non_empty_dir(&target.destination) {
            self.transition(target, DeployState::BackingUp);
            Some(self.back_up(target).map_err(|e| self.abort(target, e))?)
        } else {
            self.emit(
                Level::Info,
                &format!("{}: no prior deployment, skipping backup", target),
            );
            None
        };

        self.transition(target, DeployState::Staging);
        let staging = match tempfile::Builder::new()
            .prefix(&self.paths.staging_prefix(&target.repo_name))
            .tempdir_in(self.paths.destination_base())
        {
            Ok(dir) => dir,
            Err(e) => {
                let err = DeployError::FetchFailed(format!("cannot create staging directory: {}", e));
                return Err(self.recover(target, err, protection.as_ref()));
            }
        };

        match self.stage(target, credential, staging.path()) {
            Ok(()) => {}
            // The destination has not been touched yet.
            Err(err @ DeployError::Interrupted(_)) => return Err(self.abort(target, err)),
            Err(err) => return Err(self.recover(target, err, protection.as_ref())),
        }

        if let Err(err) = self.check_interrupt("swapping") {
            // The destination has not been touched yet.
            return Err(self.abort(target, err));
        }

        self.transition(target, DeployState::Swapping);
        let entries = match self.swap(staging.path(), &target.destination) {
            Ok(entries) => entries,
            Err(err) => return Err(self.recover(target, err, protection.as_ref())),
        };

        let staging_path = staging.path().to_path_buf();
        let discard = self.policy.execute("discard staging", self.sink.as_ref(), || {
            remove_path(&staging_path)
        });
        if let OperationOutcome::FailedExhausted { last_error, .. } = discard {
            let err = DeployError::SwapFailed(format!(
                "cannot remove staging directory {}: {}",
                staging_path.display(),
                last_error
            ));
            return Err(self.recover(target, err, protection.as_ref()));
        }

        self.transition(target, DeployState::Succeeded);
        Ok(Deployed {
            destination: target.destination.clone(),
            snapshot: protection.map(|p| p.snapshot),
            entries,
        })
    }

    /// Restore `target.destination` from its live snapshot without fetching.
    pub fn rollback(&self, target: &DeploymentTarget) -> Result<Snapshot, DeployFailure> {
        self.transition(target, DeployState::Validating);
        let _lock = self.preflight(target).map_err(|e| self.abort(target, e))?;

        let backup = self.paths.backup(&target.repo_name);
        let Some(snapshot) = self.snapshots.existing(&backup, &target.destination) else {
            let err = DeployError::RestoreFailed(format!("no snapshot at {}", backup.display()));
            return Err(self.abort(target, err));
        };

        self.transition(target, DeployState::RollingBack);
        match self.snapshots.restore(&snapshot.path, &target.destination) {
            Ok(()) => {
                self.transition(target, DeployState::RolledBack);
                Ok(snapshot)
            }
            Err(e) => {
                let err = DeployError::RestoreFailed(e.to_string());
                self.emit(Level::Error, &format!("{}: {}", target, err));
                self.transition(target, DeployState::Failed);
                Err(DeployFailure::Unrecoverable {
                    cause: err,
                    restore: None,
                })
            }
        }
    }

    /// Check the layout and take the deployment lock.
    fn preflight(&self, target: &DeploymentTarget) -> Result<DeployLock, DeployError> {
        require_dir(self.paths.destination_base(), "destination base")?;
        require_dir(self.paths.backup_base(), "backup base")?;

        let expected = self.paths.destination(&target.repo_name);
        if target.destination != expected {
            return Err(DeployError::Configuration(format!(
                "destination {} is not {}",
                target.destination.display(),
                expected.display()
            )));
        }
        self.check_disjoint(target)?;
        if target.destination.exists() && !target.destination.is_dir() {
            return Err(DeployError::Configuration(format!(
                "destination {} exists and is not a directory",
                target.destination.display()
            )));
        }

        let lock_path = self.paths.lock_path(&target.repo_name);
        match DeployLock::try_acquire(&lock_path) {
            Ok(Some(lock)) => Ok(lock),
            Ok(None) => Err(DeployError::Configuration(format!(
                "another deployment of {} is in progress (lock {})",
                target.repo_name,
                lock_path.display()
            ))),
            Err(e) => Err(DeployError::Configuration(format!(
                "cannot open lock {}: {}",
                lock_path.display(),
                e
            ))),
        }
    }

    /// Reject layouts where the snapshot slot and the destination overlap.
    /// Capturing deletes the slot first, so a destination inside it would
    /// be lost before it is copied.
    fn check_disjoint(&self, target: &DeploymentTarget) -> Result<(), DeployError> {
        let canonical = |path: &Path, what: &str| {
            path.canonicalize().map_err(|e| {
                DeployError::Configuration(format!("cannot resolve {} {}: {}", what, path.display(), e))
            })
        };
        let destination = canonical(self.paths.destination_base(), "destination base")?
            .join(target.repo_name.as_str());
        let backup = canonical(self.paths.backup_base(), "backup base")?
            .join(target.repo_name.as_str());

        if destination.starts_with(&backup) || backup.starts_with(&destination) {
            return Err(DeployError::Configuration(format!(
                "backup path {} and destination {} overlap",
                backup.display(),
                destination.display()
            )));
        }
        Ok(())
    }

    fn back_up(&self, target: &DeploymentTarget) -> Result<Protection, DeployError> {
        let exclusions = ExclusionPatternSet::load(&target.destination)
            .map_err(|e| DeployError::BackupFailed(e.to_string()))?;
        let backup = self.paths.backup(&target.repo_name);
        let snapshot = self
            .snapshots
            .capture(&target.destination, &backup, &exclusions)
            .map_err(|e| DeployError::BackupFailed(e.to_string()))?;
        Ok(Protection {
            snapshot,
            exclusions,
        })
    }

    /// Materialize the branch into `staging`, retrying transient failures.
    /// A missing branch or an interrupt is not retried.
    fn stage(
        &self,
        target: &DeploymentTarget,
        credential: &Credential,
        staging: &Path,
    ) -> Result<(), DeployError> {
        let outcome = self.policy.execute("fetch", self.sink.as_ref(), || -> Result<Result<(), DeployError>, GitError> {
            remove_dir_contents(staging).map_err(GitError::Io)?;
            match self
                .fetcher
                .materialize(&target.locator, &target.branch, credential, staging)
            {
                Ok(()) => Ok(Ok(())),
                Err(GitError::BranchNotFound(branch)) => Ok(Err(DeployError::BranchNotFound(branch))),
                // A Ctrl-C also reaches the git child; do not retry it.
                Err(e) if self.interrupted.load(Ordering::SeqCst) => {
                    self.emit(Level::Warn, &format!("{}: fetch stopped by interrupt: {}", target, e));
                    Ok(Err(DeployError::Interrupted("swapping".to_string())))
                }
                Err(e) => Err(e),
            }
        });

        outcome.into_result(|_, e| DeployError::FetchFailed(e.to_string()))?
    }

    /// Empty the destination, then copy the staged tree in.
    fn swap(&self, staging: &Path, destination: &Path) -> Result<u64, DeployError> {
        let cleared = self
            .policy
            .execute("clear destination", self.sink.as_ref(), || {
                if destination.exists() {
                    remove_dir_contents(destination)
                } else {
                    std::fs::create_dir_all(destination)
                }
            });
        cleared.into_result(|_, e| DeployError::SwapFailed(format!("clearing destination: {}", e)))?;

        let installed = self
            .policy
            .execute("install staged tree", self.sink.as_ref(), || {
                remove_dir_contents(destination)?;
                copy_tree(staging, destination, &|rel: &Path, _is_dir: bool| {
                    is_metadata_path(rel)
                })
            });
        installed.into_result(|_, e| DeployError::SwapFailed(format!("installing staged tree: {}", e)))
    }

    /// Roll back if a snapshot exists, otherwise fail outright.
    fn recover(
        &self,
        target: &DeploymentTarget,
        cause: DeployError,
        protection: Option<&Protection>,
    ) -> DeployFailure {
        self.emit(Level::Error, &format!("{}: {}", target, cause));

        let Some(protection) = protection else {
            self.transition(target, DeployState::Failed);
            return DeployFailure::Unrecoverable {
                cause,
                restore: None,
            };
        };

        self.transition(target, DeployState::RollingBack);
        match self.snapshots.restore_filtered(
            &protection.snapshot.path,
            &target.destination,
            &protection.exclusions,
        ) {
            Ok(()) => {
                self.transition(target, DeployState::RolledBack);
                DeployFailure::RolledBack { cause }
            }
            Err(e) => {
                let restore = DeployError::RestoreFailed(e.to_string());
                self.emit(
                    Level::Error,
                    &format!("{}: {}; manual recovery required", target, restore),
                );
                self.transition(target, DeployState::Failed);
                DeployFailure::Unrecoverable {
                    cause,
                    restore: Some(restore),
                }
            }
        }
    }

    /// Fail before anything was modified.
    fn abort(&self, target: &DeploymentTarget, cause: DeployError) -> DeployFailure {
        self.emit(Level::Error, &format!("{}: {}", target, cause));
        self.transition(target, DeployState::Failed);
        DeployFailure::Aborted(cause)
    }

    fn check_interrupt(&self, step: &str) -> Result<(), DeployError> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(DeployError::Interrupted(step.to_string()));
        }
        Ok(())
    }

    fn transition(&self, target: &DeploymentTarget, next: DeployState) {
        self.state.set(next);
        self.emit(
            Level::Info,
            &format!("{} [{}]: {}", target, target.destination.display(), next),
        );
    }

    fn emit(&self, level: Level, message: &str) {
        self.sink.record(level, message);
    }
}

fn require_dir(path: &Path, what: &str) -> Result<(), DeployError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(DeployError::Configuration(format!(
            "{} {} is not an existing directory",
            what,
            path.display()
        )))
    }
}
