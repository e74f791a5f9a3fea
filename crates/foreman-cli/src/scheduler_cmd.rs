//! `foreman scheduler` subcommands: drive the Scheduler's tick loop (spec
//! §4.6) either once or continuously.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use tracing::info;

use foreman_core::Scheduler;

use crate::context::Cli;

#[derive(Subcommand)]
pub enum SchedulerCommands {
    /// Run exactly one tick and exit.
    Tick,
    /// Run ticks forever, sleeping `tick_interval_secs` (from config)
    /// between each one.
    Run,
}

pub async fn run(cli: &Cli, command: SchedulerCommands, orchestrator_id: String, config_path: PathBuf) -> Result<()> {
    let tick_interval = std::time::Duration::from_secs(cli.config.server.tick_interval_secs);
    let mut scheduler = Scheduler::new(
        cli.pool.clone(),
        cli.config.clone(),
        cli.worktree.clone(),
        cli.task_log.clone(),
        cli.lifecycle.clone(),
        orchestrator_id,
        config_path,
    );

    match command {
        SchedulerCommands::Tick => {
            let report = scheduler.tick().await?;
            print_report(&report);
        }
        SchedulerCommands::Run => loop {
            let report = scheduler.tick().await?;
            print_report(&report);

            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("SIGINT received, propagating to agent processes");
                    scheduler.terminate_all();
                    std::process::exit(130);
                }
            }
        },
    }

    Ok(())
}

fn print_report(report: &foreman_core::scheduler::TickReport) {
    if report.paused {
        info!("tick skipped: scheduler paused");
        return;
    }
    info!(
        launched = report.launched.len(),
        skipped = report.skipped.len(),
        reaped = report.reaped.len(),
        zombies_reclaimed = report.zombies_reclaimed.len(),
        accepted = report.accepted.len(),
        left_for_human = report.left_for_human.len(),
        "tick complete"
    );
    for (name, reason) in &report.skipped {
        tracing::debug!(agent = %name, reason, "blueprint skipped");
    }
    for (task_id, outcome) in &report.burnout {
        info!(task_id, ?outcome, "burnout sweep");
    }
    for (task_id, outcome) in &report.rebased {
        info!(task_id, ?outcome, "rebase attempt");
    }
}
