//! `foreman status` command: queue counts at a glance, or one task's full
//! detail plus its task-log history when given an ID.

use anyhow::{Context, Result};

use foreman_db::queries::{inbox, tasks};

use crate::context::Cli;

pub async fn run(cli: &Cli, task_id: Option<&str>) -> Result<()> {
    match task_id {
        Some(id) => show_task(cli, id).await,
        None => show_queue_counts(cli).await,
    }
}

async fn show_queue_counts(cli: &Cli) -> Result<()> {
    let counts = tasks::queue_counts(&cli.pool, &cli.config.scope).await?;
    if counts.is_empty() {
        println!("no tasks in scope {:?}", cli.config.scope);
        return Ok(());
    }

    println!("{:<14} {:>6}", "QUEUE", "COUNT");
    for (queue, count) in &counts {
        println!("{queue:<14} {count:>6}");
    }
    Ok(())
}

pub async fn show_inbox(cli: &Cli) -> Result<()> {
    let messages = inbox::list_messages(&cli.pool, &cli.config.scope).await?;
    if messages.is_empty() {
        println!("inbox empty");
        return Ok(());
    }

    for message in &messages {
        let task = message.task_id.as_deref().unwrap_or("-");
        println!("[{}] task={task} {}", message.created_at.format("%Y-%m-%dT%H:%M:%SZ"), message.reason);
        if let Some(log) = &message.task_log_path {
            println!("  log: {log}");
        }
    }
    Ok(())
}

async fn show_task(cli: &Cli, task_id: &str) -> Result<()> {
    let task = tasks::get_task(&cli.pool, &cli.config.scope, task_id)
        .await
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.title, task.id);
    println!("Queue: {}", task.queue);
    println!("Role: {}   Priority: {}   Type: {}", task.role, task.priority, task.type_.as_deref().unwrap_or("-"));
    let worktree_branch = foreman_core::WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());
    println!("Branch: {worktree_branch}   Base: {}", task.branch);
    println!("Attempts: {}   Rejections: {}   Commits: {}   Turns: {}", task.attempt_count, task.rejection_count, task.commits_count, task.turns_used);
    if let Some(pr) = task.pr_number {
        println!("PR: #{pr} ({})", task.pr_url.as_deref().unwrap_or("-"));
    }
    if task.needs_rebase {
        println!("Needs rebase: flagged at {:?}", task.needs_rebase_at);
    }
    if let Some(reason) = &task.continuation_reason {
        println!("Continuation pending ({}): {reason}", task.last_agent.as_deref().unwrap_or("?"));
    }
    println!();

    let events = cli.task_log.get_events(&task.id).unwrap_or_default();
    if events.is_empty() {
        println!("No task log entries.");
    } else {
        println!("Task log:");
        for line in &events {
            println!("  {line}");
        }
    }

    Ok(())
}
