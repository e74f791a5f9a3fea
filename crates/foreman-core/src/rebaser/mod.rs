//! Rebaser (spec §4.8): background worker that keeps task branches current
//! against their base as it moves, so a long-running task doesn't submit
//! against a base that has already drifted out from under it. Runs in a
//! worktree dedicated to the rebaser, distinct from the task's own worktree
//! and from any agent's persistent scratch worktree.
//!
//! v1 skips `role = orchestrator_impl` tasks (spec §4.8): submodule
//! rebasing needs its own handling, not built here.

use chrono::{DateTime, Utc};
use foreman_db::models::{StoreError, Task, ThreadRole};
use foreman_db::queries::tasks;
use foreman_db::queries::threads;
use sqlx::PgPool;

use crate::config::Config;
use crate::hooks::builtin;
use crate::role::{WorktreePolicy, descriptor_for_str};
use crate::tasklog::TaskLog;
use crate::worktree::{WorktreeError, WorktreeManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Rebased,
    Conflict,
    TestsFailed,
    PushFailed,
    Throttled,
    Skipped,
}

/// v1 limitation (spec §4.8): submodule/orchestrator-tooling tasks (those
/// whose role descriptor uses a persistent worktree) are not rebased by
/// this worker.
pub fn is_v1_skipped(role: &str) -> bool {
    descriptor_for_str(role).worktree_policy == WorktreePolicy::Persistent
}

/// Whether `flagged_at` is still within `cooldown_secs` of `now`.
pub fn is_throttled(flagged_at: DateTime<Utc>, now: DateTime<Utc>, cooldown_secs: i64) -> bool {
    now - flagged_at < chrono::Duration::seconds(cooldown_secs)
}

/// One tick of the rebaser: process every task flagged `needs_rebase`,
/// oldest flag first.
pub async fn tick(
    pool: &PgPool,
    scope: &str,
    config: &Config,
    worktree: &WorktreeManager,
    task_log: &TaskLog,
    now: DateTime<Utc>,
) -> Result<Vec<(String, RebaseOutcome)>, StoreError> {
    let flagged = tasks::list_needs_rebase(pool, scope).await?;
    let mut outcomes = Vec::new();

    for task in flagged {
        let outcome = process_task(pool, scope, config, worktree, task_log, &task, now).await?;
        outcomes.push((task.id, outcome));
    }

    Ok(outcomes)
}

async fn process_task(
    pool: &PgPool,
    scope: &str,
    config: &Config,
    worktree: &WorktreeManager,
    task_log: &TaskLog,
    task: &Task,
    now: DateTime<Utc>,
) -> Result<RebaseOutcome, StoreError> {
    if is_v1_skipped(&task.role) {
        return Ok(RebaseOutcome::Skipped);
    }

    if let Some(flagged_at) = task.needs_rebase_at {
        if is_throttled(flagged_at, now, config.jobs.rebase_cooldown_secs) {
            return Ok(RebaseOutcome::Throttled);
        }
    }

    let rebaser_branch = format!("rebaser/{}", task.id);
    let worktree_info = match worktree.create_worktree(&rebaser_branch, &task.branch) {
        Ok(info) => info,
        Err(err) => {
            tracing::warn!(task_id = %task.id, error = %err, "rebaser could not prepare worktree");
            return Ok(RebaseOutcome::Skipped);
        }
    };

    let task_branch = WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());

    let checkout = std::process::Command::new("git")
        .args(["fetch", "origin", &task_branch])
        .current_dir(&worktree_info.path)
        .output();
    if checkout.as_ref().map(|o| !o.status.success()).unwrap_or(true) {
        note(pool, &task.id, "rebaser could not fetch the task branch from origin").await?;
        cleanup_rebaser_worktree(worktree, &worktree_info.path, &rebaser_branch);
        return Ok(RebaseOutcome::Skipped);
    }
    let _ = std::process::Command::new("git")
        .args(["checkout", "-B", &task_branch, &format!("origin/{task_branch}")])
        .current_dir(&worktree_info.path)
        .output();

    let rebase = std::process::Command::new("git")
        .args(["rebase", &format!("origin/{}", task.branch)])
        .current_dir(&worktree_info.path)
        .output();

    let rebase_ok = rebase.map(|o| o.status.success()).unwrap_or(false);
    if !rebase_ok {
        let conflicted = std::process::Command::new("git")
            .args(["diff", "--name-only", "--diff-filter=U"])
            .current_dir(&worktree_info.path)
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
            .unwrap_or_default();
        let _ = std::process::Command::new("git")
            .args(["rebase", "--abort"])
            .current_dir(&worktree_info.path)
            .output();

        reject(
            pool,
            scope,
            config,
            task_log,
            task,
            &format!("rebase conflict against `{}`:\n{conflicted}", task.branch),
        )
        .await?;
        cleanup_rebaser_worktree(worktree, &worktree_info.path, &rebaser_branch);
        return Ok(RebaseOutcome::Conflict);
    }

    let ctx = crate::hooks::HookContext {
        task_id: task.id.clone(),
        task_title: task.title.clone(),
        branch_name: task_branch.clone(),
        base_branch: task.branch.clone(),
        worktree_path: worktree_info.path.clone(),
        agent_name: "rebaser".to_owned(),
        commits_count: task.commits_count,
        merge_method: task.merge_method.to_string(),
        pr_number: task.pr_number,
        extra: Default::default(),
    };
    let test_result = builtin::run_tests(&ctx).await;
    if test_result.outcome == crate::hooks::HookOutcome::Failure {
        reject(pool, scope, config, task_log, task, &test_result.message).await?;
        cleanup_rebaser_worktree(worktree, &worktree_info.path, &rebaser_branch);
        return Ok(RebaseOutcome::TestsFailed);
    }

    match worktree.force_push(&worktree_info.path, &task_branch) {
        Ok(()) => {
            tasks::clear_rebase_flag(pool, scope, &task.id).await?;
            cleanup_rebaser_worktree(worktree, &worktree_info.path, &rebaser_branch);
            Ok(RebaseOutcome::Rebased)
        }
        Err(WorktreeError::GitExit { stderr, .. }) => {
            note(pool, &task.id, &format!("rebaser force-push failed: {stderr}")).await?;
            cleanup_rebaser_worktree(worktree, &worktree_info.path, &rebaser_branch);
            Ok(RebaseOutcome::PushFailed)
        }
        Err(err) => {
            note(pool, &task.id, &format!("rebaser force-push failed: {err}")).await?;
            cleanup_rebaser_worktree(worktree, &worktree_info.path, &rebaser_branch);
            Ok(RebaseOutcome::PushFailed)
        }
    }
}

async fn reject(
    pool: &PgPool,
    scope: &str,
    config: &Config,
    task_log: &TaskLog,
    task: &Task,
    reason: &str,
) -> Result<(), StoreError> {
    threads::append_message(pool, &task.id, "rebaser", ThreadRole::Rejection, reason).await?;
    tasks::reject_task(pool, scope, &task.id, task.version, config.queue_limits.max_rejections as i32).await?;
    if let Err(err) = task_log.log_rejected(&task.id, reason, "rebaser") {
        tracing::warn!(task_id = %task.id, error = %err, "failed to append task log entry");
    }
    Ok(())
}

async fn note(pool: &PgPool, task_id: &str, content: &str) -> Result<(), StoreError> {
    threads::append_message(pool, task_id, "rebaser", ThreadRole::Note, content).await?;
    Ok(())
}

fn cleanup_rebaser_worktree(worktree: &WorktreeManager, path: &std::path::Path, branch: &str) {
    let _ = worktree.cleanup(path, branch, false);
    let _ = worktree.remove_worktree(path);
    let _ = worktree.delete_branch(branch);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_impl_tasks_are_skipped() {
        assert!(is_v1_skipped("orchestrator_impl"));
        assert!(!is_v1_skipped("builder"));
        assert!(!is_v1_skipped("breakdown"));
    }

    #[test]
    fn throttle_respects_cooldown_window() {
        let flagged_at = Utc::now() - chrono::Duration::seconds(100);
        assert!(is_throttled(flagged_at, Utc::now(), 600));
        assert!(!is_throttled(flagged_at, Utc::now(), 60));
    }
}
