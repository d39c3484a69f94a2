//! Outcome reporting for the deploy and rollback commands.

use serde::Serialize;

use crate::deploy::{DeployFailure, Deployed, Snapshot};
use crate::types::DeploymentTarget;

/// How a run ended, as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// Stopped before anything was modified.
    Aborted,
    RolledBack,
    /// The destination may be partial or empty.
    Failed,
}

/// Which command produced the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deploy,
    Rollback,
}

/// Machine-readable summary printed with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub operation: Operation,
    pub repository: String,
    pub branch: String,
    pub destination: String,
    pub status: RunStatus,
    pub snapshot: Option<String>,
    pub error: Option<String>,
    pub rollback_error: Option<String>,
    #[serde(skip)]
    exit_code: i32,
    #[serde(skip)]
    manual_recovery: bool,
}

impl DeployReport {
    fn base(operation: Operation, target: &DeploymentTarget, status: RunStatus) -> Self {
        Self {
            operation,
            repository: target.repo_name.to_string(),
            branch: target.branch.to_string(),
            destination: target.destination.display().to_string(),
            status,
            snapshot: None,
            error: None,
            rollback_error: None,
            exit_code: 0,
            manual_recovery: false,
        }
    }

    fn failure(operation: Operation, target: &DeploymentTarget, failure: &DeployFailure) -> Self {
        let status = match failure {
            DeployFailure::Aborted(_) => RunStatus::Aborted,
            DeployFailure::RolledBack { .. } => RunStatus::RolledBack,
            DeployFailure::Unrecoverable { .. } => RunStatus::Failed,
        };
        let mut report = Self::base(operation, target, status);
        report.error = Some(failure.cause().to_string());
        if let DeployFailure::Unrecoverable {
            restore: Some(restore),
            ..
        } = failure
        {
            report.rollback_error = Some(restore.to_string());
        }
        report.exit_code = failure.exit_code();
        report.manual_recovery = failure.requires_manual_recovery();
        report
    }

    pub fn from_deploy(target: &DeploymentTarget, result: &Result<Deployed, DeployFailure>) -> Self {
        match result {
            Ok(deployed) => {
                let mut report = Self::base(Operation::Deploy, target, RunStatus::Succeeded);
                report.snapshot = deployed
                    .snapshot
                    .as_ref()
                    .map(|s| s.path.display().to_string());
                report
            }
            Err(failure) => Self::failure(Operation::Deploy, target, failure),
        }
    }

    pub fn from_rollback(target: &DeploymentTarget, result: &Result<Snapshot, DeployFailure>) -> Self {
        match result {
            Ok(snapshot) => {
                let mut report = Self::base(Operation::Rollback, target, RunStatus::RolledBack);
                report.snapshot = Some(snapshot.path.display().to_string());
                report
            }
            Err(failure) => Self::failure(Operation::Rollback, target, failure),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// One-line message for a terminal.
    pub fn message(&self) -> String {
        let error = self.error.as_deref().unwrap_or("unknown error");
        if self.operation == Operation::Rollback {
            return self.rollback_message(error);
        }
        let name = format!("{}@{}", self.repository, self.branch);
        match self.status {
            RunStatus::Succeeded => format!("Deployed {} to {}", name, self.destination),
            RunStatus::RolledBack => format!(
                "Deployment of {} failed, rolled back successfully: {}",
                name, error
            ),
            RunStatus::Aborted => format!(
                "Deployment of {} aborted, {} was not modified: {}",
                name, self.destination, error
            ),
            RunStatus::Failed if self.manual_recovery => format!(
                "Deployment of {} failed, rollback also failed: manual recovery required for {}\n  cause:    {}\n  rollback: {}",
                name,
                self.destination,
                error,
                self.rollback_error.as_deref().unwrap_or(error)
            ),
            RunStatus::Failed => format!(
                "Deployment of {} failed with no previous deployment to restore: {}",
                name, error
            ),
        }
    }

    fn rollback_message(&self, error: &str) -> String {
        let name = format!("{}@{}", self.repository, self.branch);
        match self.status {
            RunStatus::Aborted => format!(
                "Rollback of {} aborted, {} was not modified: {}",
                name, self.destination, error
            ),
            RunStatus::Failed => format!(
                "Rollback of {} failed: manual recovery required for {}\n  cause: {}",
                name, self.destination, error
            ),
            _ => format!(
                "Rolled back {} from {}",
                self.destination,
                self.snapshot.as_deref().unwrap_or("snapshot")
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
