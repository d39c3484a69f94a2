mod doctor;
mod report;

pub use doctor::{print_checks, run_checks};
pub use report::{DeployReport, RunStatus};
