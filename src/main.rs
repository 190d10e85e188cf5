mod cli;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use cli::commands::{Cli, Commands};
use cli::progress::CliReporter;
use colored::*;
use dotenv::dotenv;
use indicatif::HumanBytes;
use session_janitor::config::{load_configuration, load_configuration_from};
use session_janitor::{
    ArchiveOutcome, DueQueue, MonitoringLoop, PressureLevel, RecordStatus, StorageConfig,
    StorageEngine,
};
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

fn main() {
    dotenv().ok();

    let _guard = cli::logging::init_logger();

    let args = Cli::parse();

    let loaded = match &args.config {
        Some(path) => load_configuration_from(path, true),
        None => load_configuration(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Err(err) = run(command, config) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run(command: Commands, config: StorageConfig) -> Result<()> {
    let open = || StorageEngine::new(config.clone()).context("initialising session storage");

    match command {
        Commands::Status => print_status(&open()?),
        Commands::List => print_sessions(&open()?)?,
        Commands::Info { session_id } => {
            let info = open()?
                .lifecycle_info(&session_id)
                .with_context(|| format!("looking up session {}", session_id))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Discover => print_candidates(&open()?),
        Commands::Cleanup { force, json } => run_cleanup(&open()?, force, json)?,
        Commands::Archive { session_id } => match open()?.archive(&session_id)? {
            ArchiveOutcome::Archived(record) => println!(
                "Archived {} to {} ({})",
                session_id.cyan(),
                record.archive_path.display(),
                HumanBytes(record.size_bytes)
            ),
            ArchiveOutcome::Failed { error } => {
                anyhow::bail!("archiving {} failed: {}", session_id, error)
            }
        },
        Commands::Watch { ticks, interval } => {
            let due_queue = Arc::new(DueQueue::new());
            let engine = Arc::new(open()?.with_scheduler(due_queue.clone()));
            let mut monitor =
                MonitoringLoop::new(Arc::clone(&engine)).with_due_queue(due_queue);
            if let Some(secs) = interval {
                monitor = monitor.with_interval(Duration::from_secs(secs.max(1)));
            }
            let stop = AtomicBool::new(false);
            monitor.run(&stop, ticks);
        }
        Commands::PrintConfig => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}

fn print_status(engine: &StorageEngine) {
    let (snapshot, level) = engine.pressure();
    let level_str = match level {
        PressureLevel::Normal => level.to_string().green(),
        PressureLevel::Warning => level.to_string().yellow(),
        PressureLevel::Critical => level.to_string().red(),
    };
    println!(
        "{} used of {} ({} free): {} [{}]",
        HumanBytes(snapshot.used_bytes),
        HumanBytes(snapshot.total_bytes),
        HumanBytes(snapshot.free_bytes),
        format!("{:.2}%", snapshot.used_percent).bold(),
        level_str
    );
}

fn print_sessions(engine: &StorageEngine) -> Result<()> {
    let active = engine.list_active()?;
    for info in &active.sessions {
        println!(
            "{:<40} {:>10} {:>6} files {:>7.1}h {}",
            info.session_id.cyan(),
            HumanBytes(info.size_bytes).to_string(),
            info.file_count,
            info.age_hours,
            info.status
        );
    }
    println!(
        "{} sessions, {} in {} files",
        active.sessions.len(),
        HumanBytes(active.total_size_bytes),
        active.total_file_count
    );
    Ok(())
}

fn print_candidates(engine: &StorageEngine) {
    let candidates = engine.candidates();
    for candidate in &candidates {
        let reason = if candidate.is_reclaimable() {
            candidate.dominant_reason.to_string().red()
        } else {
            candidate.dominant_reason.to_string().dimmed()
        };
        println!(
            "{:<40} {:>6} {:<14} {:>10} {}",
            candidate.session.id.cyan(),
            candidate.score,
            reason,
            HumanBytes(candidate.size_bytes).to_string(),
            candidate.session.status
        );
    }
    let reclaimable = candidates.iter().filter(|c| c.is_reclaimable()).count();
    println!("{} sessions, {} reclaimable", candidates.len(), reclaimable);
}

fn run_cleanup(engine: &StorageEngine, force: bool, json: bool) -> Result<()> {
    let report = if json {
        engine.run_cleanup(force)
    } else {
        engine.run_cleanup_with(force, &CliReporter::new())
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for record in &report.records {
        let status = match record.status {
            RecordStatus::Cleaned => "cleaned".green(),
            RecordStatus::Failed => "failed".red(),
            RecordStatus::SkippedRecentActivity => "skipped".yellow(),
        };
        println!(
            "{:<40} {:<14} {:>10} {}",
            record.session_id.cyan(),
            record.reason.to_string(),
            HumanBytes(record.bytes_freed).to_string(),
            status
        );
    }
    println!(
        "{} mode: {} of {} sessions cleaned, {} freed, {:.2}% -> {:.2}% used",
        if report.emergency_mode { "Emergency".red() } else { "Bounded".normal() },
        format!("{}", report.sessions_cleaned).green(),
        report.sessions_analyzed,
        HumanBytes(report.bytes_freed),
        report.disk_before.used_percent,
        report.disk_after.used_percent
    );
    Ok(())
}
