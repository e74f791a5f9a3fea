//! `foreman rebase` command: run the Rebaser (spec §4.8) once, independent
//! of the scheduler's tick loop. Useful for triggering a rebase pass by hand
//! or from an external cron rather than waiting on the next scheduler tick.

use anyhow::Result;

use foreman_core::rebaser;

use crate::context::Cli;

pub async fn run(cli: &Cli) -> Result<()> {
    let outcomes = rebaser::tick(&cli.pool, &cli.config.scope, &cli.config, &cli.worktree, &cli.task_log, chrono::Utc::now()).await?;

    if outcomes.is_empty() {
        println!("no tasks flagged for rebase");
        return Ok(());
    }

    for (task_id, outcome) in &outcomes {
        println!("{task_id}: {outcome:?}");
    }

    Ok(())
}
