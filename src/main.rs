mod cli;
mod demo;
mod logging;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Span, warn};

use cli::{Cli, Command};
use demo::{SimulatedGenerator, SimulatedTranslator, synthetic_pool};
use enrichrun::config::EnrichConfig;
use enrichrun::pipeline::{JsonlSink, Pipeline};
use enrichrun::recovery::RecoveryManager;
use enrichrun::report::{ErrorReport, ReportWriter};
use enrichrun::snapshot::{FileSnapshotStore, SnapshotStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EnrichConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?
        .with_cli_overrides(cli.batch_size, cli.seed);
    config.validate()?;

    // Only processing runs get their own log file.
    let run_log_dir =
        matches!(cli.command, Command::Demo { .. }).then_some(config.report_dir.as_path());
    let _log_guard = logging::init(cli.verbose, run_log_dir);

    match cli.command {
        Command::Status => status(&config),
        Command::Report => report(&config),
        Command::Demo { pool, fail_every } => run_demo(config, pool, fail_every).await,
    }
}

fn status(config: &EnrichConfig) -> Result<()> {
    let store = FileSnapshotStore::new(&config.checkpoint_dir, Span::current());
    let recovery = RecoveryManager::new(Arc::new(store), Span::current());
    ui::print_section("Status", &recovery.summarize());
    Ok(())
}

fn report(config: &EnrichConfig) -> Result<()> {
    let store = FileSnapshotStore::new(&config.checkpoint_dir, Span::current());
    let Some(snapshot) = store.load_latest()? else {
        println!("No checkpoint found in {}", config.checkpoint_dir.display());
        return Ok(());
    };

    let writer = ReportWriter::new(&config.report_dir, Span::current());
    let report = ErrorReport::from_snapshot(&snapshot);
    let stats_path = writer.write_stats(&snapshot.stats)?;
    let report_path = writer.write_error_report(&report)?;

    let mut body = format!(
        "Stats: {}\nError report: {}\nTotal errors: {}",
        stats_path.display(),
        report_path.display(),
        report.summary.total_errors
    );
    if let Some(worst) = &report.summary.most_problematic {
        body.push_str(&format!("\nMost problematic collaborator: {worst}"));
    }
    ui::print_section("Report", &body);
    Ok(())
}

async fn run_demo(config: EnrichConfig, pool_size: usize, fail_every: usize) -> Result<()> {
    if config.random_seed.is_none() {
        warn!("No random seed configured; an interrupted demo may not resume onto the same sets");
    }
    let latency = Duration::from_millis(20);
    let translator = SimulatedTranslator { fail_every, latency };
    let generator = SimulatedGenerator { fail_every, latency };
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let sink = JsonlSink::new(config.report_dir.join(format!("enriched_{stamp}.jsonl")));

    let spinner = ui::StageSpinner::start("Starting demo run");
    let mut pipeline = Pipeline::with_file_store(config).with_stage_hook(spinner.stage_hook());

    match pipeline
        .run(synthetic_pool(pool_size), &translator, &generator, &sink)
        .await
    {
        Ok(outcome) => {
            spinner.complete(&outcome);
            Ok(())
        }
        Err(e) => {
            spinner.fail(&e.to_string());
            Err(e.into())
        }
    }
}
