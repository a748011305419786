//! Asigna Daemon - runs one case-assignment pass per invocation.
//!
//! Scheduling is external (cron/systemd timers); the scheduler must not
//! overlap two runs of the same pass, or both will read the same roster
//! snapshot and hand out colliding case codes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use asigna_common::config::{session_from_env, AsignaConfig};
use asigna_common::orchestrator::{run_pass, RunOptions, RunReport};
use asigna_common::store::RestFeatureStore;

#[derive(Parser)]
#[command(name = "asignad")]
#[command(about = "Municipal case assignment and work-order provisioning", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: /etc/asigna/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one assignment pass
    Run {
        /// Which pass to run
        #[arg(long, value_enum)]
        pass: PassName,

        /// Build and validate the batches but write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Parse and validate the configuration file
    CheckConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PassName {
    Inspection,
    Supervision,
    Commissioner,
}

impl PassName {
    fn as_str(&self) -> &'static str {
        match self {
            PassName::Inspection => "inspection",
            PassName::Supervision => "supervision",
            PassName::Commissioner => "commissioner",
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AsignaConfig::default_path);

    match cli.command {
        Commands::CheckConfig => {
            let config = AsignaConfig::load(&config_path)?;
            info!(
                path = %config_path.display(),
                passes = config.passes.len(),
                "configuration is valid"
            );
            Ok(())
        }
        Commands::Run { pass, dry_run } => {
            let config = AsignaConfig::load(&config_path)?;
            let session = session_from_env(&config.portal_url)?;
            let store = RestFeatureStore::new(session, config.request_timeout_secs)
                .context("failed to build feature-store client")?;

            let options = RunOptions { dry_run };
            let report = run_pass(&store, &config, pass.as_str(), &options, Utc::now())?;
            print_report(&report);

            // Per-case skips and per-batch write failures are reported, not
            // fatal; only config/connection errors and the serializability
            // gate change the exit status.
            Ok(())
        }
    }
}

fn print_report(report: &RunReport) {
    info!(
        pass = %report.pass,
        cases = report.cases_seen,
        assignments = report.assignments,
        skipped_no_worker = report.skipped_no_worker,
        tasks_skipped = report.tasks_skipped_no_directory,
        "run complete"
    );
    for batch in &report.batches {
        match &batch.error {
            Some(error) => warn!(
                batch = %batch.batch,
                attempted = batch.attempted,
                error = %error,
                "batch failed"
            ),
            None => info!(
                batch = %batch.batch,
                attempted = batch.attempted,
                succeeded = batch.succeeded,
                failed = batch.failed,
                "batch result"
            ),
        }
    }
    if report.attachments_copied > 0 || report.attachment_failures > 0 {
        info!(
            copied = report.attachments_copied,
            failed = report.attachment_failures,
            "attachment propagation"
        );
    }
    if report.had_write_failures() {
        warn!("some writes failed; roster counters and case states may need manual reconciliation");
    }
}
