//! Environment checks for `redeploy doctor`.

use std::path::{Path, PathBuf};

use crate::config::DeployConfig;
use crate::deploy::GitCli;

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    /// Failing this check blocks deployments.
    pub required: bool,
    pub detail: String,
}

impl Check {
    fn label(&self) -> &'static str {
        match (self.ok, self.required) {
            (true, _) => "OK",
            (false, true) => "FAIL",
            (false, false) => "INFO",
        }
    }
}

fn base_dir_check(name: &'static str, path: Option<&Path>) -> Check {
    match path {
        Some(path) if path.is_dir() => Check {
            name,
            ok: true,
            required: true,
            detail: path.display().to_string(),
        },
        Some(path) => Check {
            name,
            ok: false,
            required: true,
            detail: format!("{} (not a directory)", path.display()),
        },
        None => Check {
            name,
            ok: false,
            required: false,
            detail: "not configured".to_string(),
        },
    }
}

/// Run every check against `config`.
pub fn run_checks(git: &GitCli, config: &DeployConfig, config_path: Option<PathBuf>) -> Vec<Check> {
    let git_ok = git.is_available();
    let config_found = config_path.as_ref().is_some_and(|p| p.is_file());

    vec![
        Check {
            name: "git",
            ok: git_ok,
            required: true,
            detail: if git_ok { "available" } else { "not found" }.to_string(),
        },
        Check {
            name: "Config file",
            ok: config_found,
            required: false,
            detail: config_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        },
        base_dir_check("Destination base", config.destination_base.as_deref()),
        base_dir_check("Backup base", config.backup_base.as_deref()),
    ]
}

/// Print checks; returns false if a required one failed.
pub fn print_checks(checks: &[Check]) -> bool {
    println!("redeploy system check\n");
    for check in checks {
        println!("[{}] {}: {}", check.label(), check.name, check.detail);
    }
    checks.iter().all(|c| c.ok || !c.required)
}
