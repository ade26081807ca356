//! `digest`: run every configured task once and publish snapshots.
//!
//! Meant to be invoked by an external scheduler. Exit status is 0 when every
//! task succeeded, 1 when at least one task failed, 2 when the run could not
//! start (unreadable or invalid configuration, unusable output directory).
mod config_file;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use digest_engine::{
    AtomicFileWriter, DiskSurface, MemorySurface, Orchestrator, OutputSurface, RunReport,
    TemplateRegistry,
};
use engine_logging::{engine_error, engine_info, LogDestination};
use log::LevelFilter;

use crate::config_file::{load_config, select_tasks};

#[derive(Parser)]
#[command(name = "digest", version, about = "Fetch, filter and publish content digests.")]
struct Cli {
    /// Configuration file (RON, or JSON when the extension is `.json`).
    #[arg(short, long, value_hint = ValueHint::FilePath, default_value = "digest.ron")]
    config: PathBuf,

    /// Root directory snapshots and the index are written to.
    #[arg(short, long, value_hint = ValueHint::DirPath, default_value = "site")]
    output: PathBuf,

    /// Directory of additional templates, one subdirectory per template.
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    templates: Option<PathBuf>,

    /// Write the run report as JSON to this file.
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,

    /// Run only the named task. May be repeated.
    #[arg(long, value_name = "TASK", action = ArgAction::Append)]
    only: Vec<String>,

    /// Render and commit in memory only; nothing is written to disk.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,

    /// Also write log records to ./digest.log (truncated each run).
    #[arg(long, action = ArgAction::SetTrue)]
    log_file: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let destination = if cli.log_file {
        LogDestination::Both
    } else {
        LogDestination::Terminal
    };
    engine_logging::initialize(destination, level);

    match run(&cli).await {
        Ok(report) => {
            print_summary(&report);
            if report.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            engine_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: &Cli) -> Result<RunReport> {
    let config = select_tasks(load_config(&cli.config)?, &cli.only)?;

    let mut templates = TemplateRegistry::with_builtins();
    if let Some(dir) = &cli.templates {
        let loaded = templates
            .load_dir(dir)
            .with_context(|| format!("failed to load templates from {}", dir.display()))?;
        engine_info!("{} templates loaded from {}", loaded, dir.display());
    }

    let surface: Arc<dyn OutputSurface> = if cli.dry_run {
        Arc::new(MemorySurface::new())
    } else {
        Arc::new(
            DiskSurface::new(&cli.output)
                .with_context(|| format!("output directory {}", cli.output.display()))?,
        )
    };

    let orchestrator = Orchestrator::from_settings(&config.settings, surface, Arc::new(templates))
        .context("failed to prepare engine")?;
    let report = orchestrator
        .run_batch(&config)
        .await
        .context("invalid configuration")?;

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }
    Ok(report)
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("failed to serialize run report")?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid report path {}", path.display()))?;
    AtomicFileWriter::new(dir)
        .write(name, &json)
        .with_context(|| format!("failed to write run report {}", path.display()))?;
    engine_info!("run report written to {}", path.display());
    Ok(())
}

fn print_summary(report: &RunReport) {
    for task in &report.tasks {
        match (&task.snapshot_path, &task.error) {
            (Some(snapshot), _) => println!(
                "{:<10} {} ({} of {} items, {} source errors) -> {}",
                task.status.to_string(),
                task.name,
                task.items_kept,
                task.items_fetched,
                task.source_errors.len(),
                snapshot
            ),
            (None, error) => println!(
                "{:<10} {}: {}",
                task.status.to_string(),
                task.name,
                error.as_deref().unwrap_or("no snapshot")
            ),
        }
    }
    println!(
        "{} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
}
