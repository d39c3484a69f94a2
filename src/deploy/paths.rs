//! Filesystem layout for deployments
//!
//! ```text
//! <destination_base>/
//! ├── <repo>/                      # Live deployment
//! └── .<repo>.staging-XXXXXX/      # Fresh clone, only during a deploy
//! <backup_base>/
//! ├── <repo>/                      # Single most-recent snapshot
//! └── .<repo>.lock                 # flock-based deployment lock
//! ```

use std::path::{Path, PathBuf};

use crate::types::RepoName;

/// Manages all filesystem paths for a deployment layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPaths {
    destination_base: PathBuf,
    backup_base: PathBuf,
}

impl DeployPaths {
    pub fn new(destination_base: impl Into<PathBuf>, backup_base: impl Into<PathBuf>) -> Self {
        Self {
            destination_base: destination_base.into(),
            backup_base: backup_base.into(),
        }
    }

    pub fn destination_base(&self) -> &Path {
        &self.destination_base
    }

    pub fn backup_base(&self) -> &Path {
        &self.backup_base
    }

    /// Live deployment: `{destination_base}/{repo}`
    pub fn destination(&self, repo: &RepoName) -> PathBuf {
        self.destination_base.join(repo.as_str())
    }

    /// Snapshot slot: `{backup_base}/{repo}`
    pub fn backup(&self, repo: &RepoName) -> PathBuf {
        self.backup_base.join(repo.as_str())
    }

    /// Lock file: `{backup_base}/.{repo}.lock`
    pub fn lock_path(&self, repo: &RepoName) -> PathBuf {
        self.backup_base.join(format!(".{}.lock", repo.as_str()))
    }

    /// Prefix for staging directories created next to the destination.
    pub fn staging_prefix(&self, repo: &RepoName) -> String {
        format!(".{}.staging-", repo.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoName {
        "site".parse().unwrap()
    }

    fn paths() -> DeployPaths {
        DeployPaths::new("/srv/www", "/srv/backups")
    }

    #[test]
    fn test_destination() {
        assert_eq!(paths().destination(&repo()), PathBuf::from("/srv/www/site"));
    }

    #[test]
    fn test_backup() {
        assert_eq!(paths().backup(&repo()), PathBuf::from("/srv/backups/site"));
    }

    #[test]
    fn test_lock_path_is_hidden_next_to_backup() {
        assert_eq!(
            paths().lock_path(&repo()),
            PathBuf::from("/srv/backups/.site.lock")
        );
    }

    #[test]
    fn test_staging_prefix() {
        assert_eq!(paths().staging_prefix(&repo()), ".site.staging-");
    }

    #[test]
    fn test_bases() {
        let p = paths();
        assert_eq!(p.destination_base(), Path::new("/srv/www"));
        assert_eq!(p.backup_base(), Path::new("/srv/backups"));
    }
}
