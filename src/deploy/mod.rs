//! Deployment engine
//!
//! This module turns a git branch into a directory tree under a destination
//! base, keeping one snapshot of the previous deployment for rollback.
//!
//! # Layout
//!
//! ```text
//! <destination_base>/<repo>/     # Live deployment (no .git)
//! <backup_base>/<repo>/          # Snapshot of the previous deployment
//! <backup_base>/.<repo>.lock     # Held for the duration of a run
//! ```
//!
//! # Flow
//!
//! 1. Check the branch exists on the remote.
//! 2. Snapshot the live tree, honoring its `.gitignore`.
//! 3. Clone into a staging directory next to the destination.
//! 4. Empty the destination and copy the staged tree in.
//! 5. On failure after step 2, restore the snapshot.

pub mod git;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod patterns;
pub mod retry;
pub mod snapshot;
pub mod tree;

#[cfg(test)]
mod testutil;

pub use git::{GitCli, GitError, GitFetcher, SourceFetcher};
pub use lock::DeployLock;
pub use orchestrator::{DeployError, DeployFailure, DeployState, Deployed, Orchestrator};
pub use paths::DeployPaths;
pub use patterns::{ExclusionPatternSet, PatternError};
pub use retry::{OperationOutcome, RetryPolicy};
pub use snapshot::{Snapshot, SnapshotError, SnapshotStore};
