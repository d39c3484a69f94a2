pub mod cli;
pub mod config;
pub mod deploy;
pub mod events;
pub mod types;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};

use crate::cli::DeployReport;
use crate::config::{DeployConfig, Overrides};
use crate::deploy::{GitCli, GitFetcher, Orchestrator};
use crate::events::{EventSink, LogSink};
use crate::types::Credential;

#[derive(Parser)]
#[command(
    name = "redeploy",
    about = "Deploy a git branch into a directory, with backup and rollback"
)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a branch and replace the deployed tree with it
    Deploy(TargetArgs),

    /// Restore the deployed tree from its last snapshot
    Rollback(TargetArgs),

    /// Check dependencies and configured directories
    Doctor,
}

#[derive(Args)]
struct TargetArgs {
    /// Repository URL or path
    #[arg(long, short)]
    repository: Option<String>,

    /// Branch to deploy (default: master)
    #[arg(long, short)]
    branch: Option<String>,

    /// Directory holding deployed trees
    #[arg(long)]
    destination_base: Option<PathBuf>,

    /// Directory holding snapshots
    #[arg(long)]
    backup_base: Option<PathBuf>,

    /// Access token for https repositories
    #[arg(long, env = "REDEPLOY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Attempts per retried step
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

impl TargetArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            destination_base: self.destination_base.clone(),
            backup_base: self.backup_base.clone(),
            max_attempts: self.max_attempts,
            retry_delay_secs: self.retry_delay,
            log_file: self.log_file.clone(),
        }
    }

    fn credential(&self) -> Credential {
        self.token.clone().map(Credential::new).unwrap_or_default()
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Deploy(args) => cmd_run(cli.config, args, false),
        Commands::Rollback(args) => cmd_run(cli.config, args, true),
        Commands::Doctor => {
            init_logging(None);
            cmd_doctor(cli.config)
        }
    };

    log::logger().flush();
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Log to stderr, or append to `log_file` when one is configured.
fn init_logging(log_file: Option<File>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(file) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
}

fn cmd_run(
    config_path: Option<PathBuf>,
    args: TargetArgs,
    rollback: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let config = DeployConfig::discover(config_path.as_deref())?.merge(args.overrides());
    init_logging(config.open_log_file()?);
    let request = config.resolve(args.credential(), rollback)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            eprintln!("Interrupt received, stopping at the next safe point");
        }
    })?;

    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let orchestrator = Orchestrator::new(
        request.paths.clone(),
        GitFetcher::new(),
        request.policy,
        sink.clone(),
    )
    .with_interrupt_flag(interrupted);

    let report = if request.rollback_requested {
        let result = orchestrator.rollback(&request.target);
        DeployReport::from_rollback(&request.target, &result)
    } else {
        let result = orchestrator.deploy(&request.target, &request.credential);
        DeployReport::from_deploy(&request.target, &result)
    };
    sink.flush();

    if args.json {
        println!("{}", report.to_json()?);
    } else if report.exit_code() == 0 {
        println!("{}", report.message());
    } else {
        eprintln!("{}", report.message());
    }

    Ok(report.exit_code())
}

fn cmd_doctor(config_path: Option<PathBuf>) -> Result<i32, Box<dyn std::error::Error>> {
    let path = config_path.clone().or_else(config::default_path);
    let config = DeployConfig::discover(config_path.as_deref())?;

    let checks = cli::run_checks(&GitCli::new(), &config, path);
    if cli::print_checks(&checks) {
        Ok(0)
    } else {
        Ok(1)
    }
}
