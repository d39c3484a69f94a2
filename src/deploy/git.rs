//! Boundary to the version-control client.
//!
//! Remote operations (branch lookup, clone) go through the git CLI with
//! hardening applied, so credentials, LFS and hooks behave predictably.
//! Local read operations use libgit2 and never touch the process working
//! directory.

use std::path::Path;
use std::process::{Command, Stdio};

use git2::Repository;
use thiserror::Error;

use super::patterns::METADATA_DIR;
use super::tree::{make_writable, remove_path};
use crate::types::{Branch, Credential};

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// The requested branch is not present on the remote.
    #[error("branch '{0}' does not exist on the remote")]
    BranchNotFound(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Listing remote refs failed.
    #[error("ls-remote failed: {0}")]
    LsRemoteError(String),
    /// Metadata could not be removed from a fresh clone.
    #[error("failed to strip .git from {path}: {source}")]
    StripError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Validate that a locator cannot be mistaken for a command-line flag.
fn validate_locator(locator: &str) -> Result<(), GitError> {
    if locator.is_empty() {
        return Err(GitError::InvalidInput("locator cannot be empty".to_string()));
    }
    if locator.starts_with('-') {
        return Err(GitError::InvalidInput(
            "locator cannot start with '-'".to_string(),
        ));
    }
    if locator.bytes().any(|b| b < 0x20) {
        return Err(GitError::InvalidInput(
            "locator cannot contain null or control characters".to_string(),
        ));
    }
    Ok(())
}

/// What the deployment needs from version control.
pub trait SourceFetcher {
    /// Whether `branch` exists on the remote. Network or auth failures are
    /// logged and reported as `false`.
    fn branch_exists(&self, locator: &str, branch: &Branch, credential: &Credential) -> bool;

    /// Produce a clean working tree of `branch` at `target`, with no
    /// version-control metadata left behind.
    fn materialize(
        &self,
        locator: &str,
        branch: &Branch,
        credential: &Credential,
        target: &Path,
    ) -> Result<(), GitError>;
}

/// Git CLI wrapper with security hardening.
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Whether git can be executed at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.git_path)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Check for `refs/heads/<branch>` on the remote at `url`.
    pub fn ls_remote_branch(&self, url: &str, branch: &Branch) -> Result<bool, GitError> {
        validate_locator(url)?;

        let output = self
            .command()
            .args(["ls-remote", "--heads"])
            .arg(url)
            .arg(format!("refs/heads/{}", branch))
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::LsRemoteError(stderr.trim().to_string()));
        }

        Ok(!output.stdout.iter().all(u8::is_ascii_whitespace))
    }

    /// Shallow, single-branch clone of `branch` into `dest`.
    ///
    /// `dest` may exist if it is empty.
    pub fn clone_branch(&self, url: &str, branch: &Branch, dest: &Path) -> Result<(), GitError> {
        validate_locator(url)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let output = self
            .command()
            .args(["clone", "--quiet", "--depth=1", "--single-branch", "--branch"])
            .arg(branch.as_str())
            .arg(url)
            .arg(dest)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Remote branch") && stderr.contains("not found") {
                return Err(GitError::BranchNotFound(branch.to_string()));
            }
            return Err(GitError::CloneError(stderr.trim().to_string()));
        }

        Ok(())
    }
}

/// Remove the metadata directory (or gitfile) from a working tree.
///
/// Write permission is forced first because git marks object files
/// read-only.
pub fn strip_metadata(worktree: &Path) -> Result<(), GitError> {
    let metadata = worktree.join(METADATA_DIR);
    if std::fs::symlink_metadata(&metadata).is_err() {
        return Ok(());
    }
    make_writable(&metadata)
        .and_then(|()| remove_path(&metadata))
        .map_err(|source| GitError::StripError {
            path: worktree.display().to_string(),
            source,
        })
}

/// Branch checked out in the repository at `path`, without changing the
/// process working directory. Returns `None` for non-repositories and
/// detached or unborn heads.
pub fn current_branch(path: &Path) -> Result<Option<String>, GitError> {
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(GitError::Git(e)),
    };
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
        Err(e) => return Err(GitError::Git(e)),
    };
    if !head.is_branch() {
        return Ok(None);
    }
    Ok(head.shorthand().map(str::to_string))
}

/// `SourceFetcher` backed by the git CLI.
#[derive(Default)]
pub struct GitFetcher {
    git: GitCli,
}

impl GitFetcher {
    pub fn new() -> Self {
        Self { git: GitCli::new() }
    }
}

impl SourceFetcher for GitFetcher {
    fn branch_exists(&self, locator: &str, branch: &Branch, credential: &Credential) -> bool {
        let url = credential.authenticated_url(locator);
        match self.git.ls_remote_branch(&url, branch) {
            Ok(exists) => exists,
            Err(e) => {
                log::warn!(
                    "could not query branch '{}' of {}: {}",
                    branch,
                    locator,
                    credential.redact(&e.to_string())
                );
                false
            }
        }
    }

    fn materialize(
        &self,
        locator: &str,
        branch: &Branch,
        credential: &Credential,
        target: &Path,
    ) -> Result<(), GitError> {
        let url = credential.authenticated_url(locator);
        self.git
            .clone_branch(&url, branch, target)
            .map_err(|e| match e {
                GitError::CloneError(msg) => GitError::CloneError(credential.redact(&msg)),
                other => other,
            })?;

        if let Ok(Some(checked_out)) = current_branch(target) {
            log::debug!("cloned {} at branch {}", locator, checked_out);
        }

        strip_metadata(target)
    }
}
