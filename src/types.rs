//! Shared types for redeploy

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("value cannot end with '{0}'")]
    InvalidEnd(char),
    #[error("value cannot contain '..'")]
    ParentTraversal,
    #[error("cannot derive a repository name from locator: {0}")]
    NoRepoName(String),
}

/// A repository name, used as the directory name under both base paths.
///
/// Validation rules:
/// - Non-empty
/// - Alphanumeric characters, hyphens, underscores, and dots only
/// - Cannot start with a dot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName(String);

impl RepoName {
    /// Returns the repository name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the repository name from a locator such as
    /// `https://github.com/owner/app.git` or `git@host:owner/app`.
    pub fn from_locator(locator: &str) -> Result<Self, ParseError> {
        let trimmed = locator.trim().trim_end_matches('/');
        let last = trimmed
            .rsplit(['/', ':'])
            .next()
            .unwrap_or_default();
        let name = last.strip_suffix(".git").unwrap_or(last);
        if name.is_empty() {
            return Err(ParseError::NoRepoName(locator.to_string()));
        }
        name.parse()
    }
}

impl FromStr for RepoName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        if s.starts_with('.') {
            return Err(ParseError::InvalidStart('.'));
        }

        for c in s.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(RepoName(s.to_string()))
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A branch name that is safe to hand to the git CLI.
///
/// Validation rules:
/// - Non-empty
/// - No `..` (path traversal)
/// - Cannot start with `-` (would be read as a flag)
/// - No null bytes, control characters or whitespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Branch(String);

impl Branch {
    /// Returns the branch name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Branch {
    fn default() -> Self {
        Branch("master".to_string())
    }
}

impl FromStr for Branch {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.contains("..") {
            return Err(ParseError::ParentTraversal);
        }
        if s.starts_with('-') {
            return Err(ParseError::InvalidStart('-'));
        }
        if s.ends_with('/') {
            return Err(ParseError::InvalidEnd('/'));
        }
        if let Some(c) = s.chars().find(|c| c.is_control() || c.is_whitespace()) {
            return Err(ParseError::InvalidCharacter(c));
        }

        Ok(Branch(s.to_string()))
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One deployable unit: where to fetch from and where the tree lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub locator: String,
    pub branch: Branch,
    pub repo_name: RepoName,
    /// `destinationBasePath/<repoName>`; may not exist yet on first deploy.
    pub destination: PathBuf,
}

impl DeploymentTarget {
    /// Build a target rooted at `destination_base`, deriving the repo name
    /// from the locator.
    pub fn new(
        locator: impl Into<String>,
        branch: Branch,
        destination_base: &Path,
    ) -> Result<Self, ParseError> {
        let locator = locator.into();
        let repo_name = RepoName::from_locator(&locator)?;
        let destination = destination_base.join(repo_name.as_str());
        Ok(Self {
            locator,
            branch,
            repo_name,
            destination,
        })
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo_name, self.branch)
    }
}

/// Authentication token for a repository locator.
///
/// Only ever exposed to build the URL handed to git. `Debug` is redacted and
/// there is no `Display` or serde impl.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// An empty credential for public repositories.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build the URL passed to git. Only `https://` locators get the token
    /// embedded; anything else is returned unchanged.
    pub fn authenticated_url(&self, locator: &str) -> String {
        match locator.strip_prefix("https://") {
            Some(rest) if !self.0.is_empty() => format!("https://{}@{}", self.0, rest),
            _ => locator.to_string(),
        }
    }

    /// Replace every occurrence of the token in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.0, "***")
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod repo_name_tests {
        use super::*;

        #[test]
        fn from_https_locator() {
            let name = RepoName::from_locator("https://github.com/octocat/Hello-World.git").unwrap();
            assert_eq!(name.as_str(), "Hello-World");
        }

        #[test]
        fn from_locator_without_suffix_and_trailing_slash() {
            let name = RepoName::from_locator("https://example.com/org/app/").unwrap();
            assert_eq!(name.as_str(), "app");
        }

        #[test]
        fn from_scp_locator() {
            let name = RepoName::from_locator("git@github.com:owner/site.git").unwrap();
            assert_eq!(name.as_str(), "site");
        }

        #[test]
        fn from_local_path_locator() {
            let name = RepoName::from_locator("/srv/git/service.git").unwrap();
            assert_eq!(name.as_str(), "service");
        }

        #[test]
        fn empty_locator_rejected() {
            assert!(matches!(
                RepoName::from_locator("https://example.com/.git"),
                Err(ParseError::NoRepoName(_))
            ));
            assert!(RepoName::from_locator("").is_err());
        }

        #[test]
        fn dot_prefix_rejected() {
            assert_eq!(
                ".hidden".parse::<RepoName>(),
                Err(ParseError::InvalidStart('.'))
            );
        }

        #[test]
        fn invalid_character_rejected() {
            assert_eq!(
                "my repo".parse::<RepoName>(),
                Err(ParseError::InvalidCharacter(' '))
            );
        }
    }

    mod branch_tests {
        use super::*;

        #[test]
        fn default_is_master() {
            assert_eq!(Branch::default().as_str(), "master");
        }

        #[test]
        fn accepts_valid_branches() {
            assert!("main".parse::<Branch>().is_ok());
            assert!("feature/my-branch".parse::<Branch>().is_ok());
            assert!("release-1.2".parse::<Branch>().is_ok());
        }

        #[test]
        fn rejects_empty() {
            assert_eq!("".parse::<Branch>(), Err(ParseError::Empty));
        }

        #[test]
        fn rejects_leading_dash() {
            assert_eq!(
                "-upload-pack".parse::<Branch>(),
                Err(ParseError::InvalidStart('-'))
            );
        }

        #[test]
        fn rejects_traversal() {
            assert_eq!(
                "foo/../bar".parse::<Branch>(),
                Err(ParseError::ParentTraversal)
            );
        }

        #[test]
        fn rejects_control_and_whitespace() {
            assert!("foo\nbar".parse::<Branch>().is_err());
            assert!("foo bar".parse::<Branch>().is_err());
            assert!("foo\0".parse::<Branch>().is_err());
        }
    }

    mod target_tests {
        use super::*;

        #[test]
        fn destination_is_base_joined_with_repo_name() {
            let target = DeploymentTarget::new(
                "https://github.com/org/web.git",
                "main".parse().unwrap(),
                Path::new("/srv/www"),
            )
            .unwrap();
            assert_eq!(target.destination, PathBuf::from("/srv/www/web"));
            assert_eq!(target.to_string(), "web@main");
        }
    }

    mod credential_tests {
        use super::*;

        #[test]
        fn debug_is_redacted() {
            let cred = Credential::new("ghp_secret");
            assert_eq!(format!("{:?}", cred), "Credential(***)");
        }

        #[test]
        fn embeds_token_in_https_url() {
            let cred = Credential::new("tok");
            assert_eq!(
                cred.authenticated_url("https://github.com/o/r.git"),
                "https://tok@github.com/o/r.git"
            );
        }

        #[test]
        fn leaves_other_schemes_alone() {
            let cred = Credential::new("tok");
            assert_eq!(cred.authenticated_url("/srv/git/r.git"), "/srv/git/r.git");
            assert_eq!(
                Credential::none().authenticated_url("https://github.com/o/r.git"),
                "https://github.com/o/r.git"
            );
        }

        #[test]
        fn redact_scrubs_token() {
            let cred = Credential::new("tok123");
            assert_eq!(
                cred.redact("fatal: https://tok123@host/r.git not found"),
                "fatal: https://***@host/r.git not found"
            );
            assert_eq!(Credential::none().redact("plain"), "plain");
        }
    }
}
