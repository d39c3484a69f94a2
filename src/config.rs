//! Deployment configuration.
//!
//! Values come from an optional JSON file, then command-line flags on top.
//! The credential is never part of the file.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deploy::{DeployPaths, RetryPolicy};
use crate::deploy::retry::{DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::types::{Branch, Credential, DeploymentTarget};

const CONFIG_DIR: &str = "redeploy";
const CONFIG_FILE: &str = "config.json";

/// Errors raised while loading or resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A required value was set neither in the file nor on the command line.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Retry settings as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_secs: DEFAULT_DELAY.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

/// Contents of `config.json`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub repository: Option<String>,
    pub branch: String,
    pub destination_base: Option<PathBuf>,
    pub backup_base: Option<PathBuf>,
    pub retry: RetryConfig,
    /// Append log records to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            repository: None,
            branch: Branch::default().to_string(),
            destination_base: None,
            backup_base: None,
            retry: RetryConfig::default(),
            log_file: None,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub destination_base: Option<PathBuf>,
    pub backup_base: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

/// Everything the orchestrator needs for one run.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub target: DeploymentTarget,
    pub paths: DeployPaths,
    pub policy: RetryPolicy,
    pub credential: Credential,
    pub rollback_requested: bool,
}

/// Default config location: `<config_dir>/redeploy/config.json`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl DeployConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given (it must exist), otherwise the default path
    /// when a file is there, otherwise defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_path() {
            Some(path) if path.is_file() => {
                log::debug!("loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply command-line values on top of the file.
    pub fn merge(mut self, overrides: Overrides) -> Self {
        if let Some(repository) = overrides.repository {
            self.repository = Some(repository);
        }
        if let Some(branch) = overrides.branch {
            self.branch = branch;
        }
        if let Some(base) = overrides.destination_base {
            self.destination_base = Some(base);
        }
        if let Some(base) = overrides.backup_base {
            self.backup_base = Some(base);
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.retry.max_attempts = max_attempts;
        }
        if let Some(delay) = overrides.retry_delay_secs {
            self.retry.delay_secs = delay;
        }
        if let Some(log_file) = overrides.log_file {
            self.log_file = Some(log_file);
        }
        self
    }

    /// Open the configured log file for appending, creating it and its
    /// parent directory if needed.
    pub fn open_log_file(&self) -> Result<Option<File>, ConfigError> {
        let Some(path) = self.log_file.as_deref() else {
            return Ok(None);
        };
        let open = || -> std::io::Result<File> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(path)
        };
        open().map(Some).map_err(|source| ConfigError::LogFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate and build the request handed to the orchestrator.
    pub fn resolve(
        &self,
        credential: Credential,
        rollback_requested: bool,
    ) -> Result<DeployRequest, ConfigError> {
        let repository = self
            .repository
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::Missing("repository"))?;
        let destination_base = self
            .destination_base
            .as_deref()
            .ok_or(ConfigError::Missing("destination_base"))?;
        let backup_base = self
            .backup_base
            .as_deref()
            .ok_or(ConfigError::Missing("backup_base"))?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        let branch: Branch = self.branch.parse().map_err(|e| ConfigError::Invalid {
            field: "branch",
            reason: format!("{}", e),
        })?;
        let target = DeploymentTarget::new(repository, branch, destination_base).map_err(|e| {
            ConfigError::Invalid {
                field: "repository",
                reason: format!("{}", e),
            }
        })?;

        Ok(DeployRequest {
            target,
            paths: DeployPaths::new(destination_base, backup_base),
            policy: self.retry.policy(),
            credential,
            rollback_requested,
        })
    }
}
