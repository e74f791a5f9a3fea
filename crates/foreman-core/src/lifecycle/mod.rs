//! Lifecycle Controller (spec §4.4): the thin layer between the Task Store
//! Client and everything else a task transition touches — the Task Log, the
//! Worktree Manager, and thread messages. Every method here wraps exactly
//! one queue transition plus its side effects; it does not make scheduling
//! decisions (that's the Scheduler, spec §4.6) or decide pass/fail on its
//! own (the caller supplies that verdict already made).

use std::path::PathBuf;

use foreman_db::models::{Hook, MergeMethod, Priority, Queue, StoreError, Task, ThreadRole};
use foreman_db::queries::tasks::{self, NewTask, TaskPatch};
use foreman_db::queries::threads;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::Config;
use crate::hooks::{self, BuiltinHook, HookContext, HookOutcome};
use crate::tasklog::TaskLog;
use crate::worktree::{WorktreeError, WorktreeManager};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    TaskLog(#[from] crate::tasklog::TaskLogError),
}

/// Everything needed to create a task, gathered from a parsed brief
/// ([`crate::brief::TaskBrief`]) or a CLI/API caller. `branch` is the base
/// branch this task's worktree forks from and the `create_pr`/`merge_pr`
/// hooks target — distinct from the task's own worktree branch, which the
/// Worktree Manager always derives from `role`/`breakdown_id`
/// ([`WorktreeManager::task_branch_name`]).
#[derive(Debug, Clone)]
pub struct NewTaskInput {
    pub id: String,
    pub title: String,
    pub role: String,
    pub priority: Priority,
    pub branch: Option<String>,
    pub flow: String,
    pub type_: Option<String>,
    pub blocked_by: Option<String>,
    pub project_id: Option<uuid::Uuid>,
    pub breakdown_id: Option<String>,
    pub breakdown_depth: i32,
    pub checks: Vec<String>,
    pub file_path: String,
    pub expedite: bool,
    pub created_by: String,
    /// Brief body text for tasks created without a human-authored brief file
    /// on disk (e.g. the Burnout & Recycler's breakdown children). When set,
    /// `create` writes it out at `file_path` under the repo root before
    /// inserting the row, so the new task's brief exists the same way a
    /// human-authored one would.
    pub body: Option<String>,
}

/// A task handed back to its assigned agent process, with its worktree
/// already prepared.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub worktree_path: PathBuf,
    pub branch_name: String,
}

#[derive(Clone)]
pub struct LifecycleController {
    pool: PgPool,
    scope: String,
    task_log: TaskLog,
    worktree: WorktreeManager,
    config: Config,
}

impl LifecycleController {
    pub fn new(pool: PgPool, config: Config, task_log: TaskLog, worktree: WorktreeManager) -> Self {
        Self {
            pool,
            scope: config.scope.clone(),
            task_log,
            worktree,
            config,
        }
    }

    fn worktree_path(&self, task: &Task) -> PathBuf {
        let branch = WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());
        self.worktree.worktree_base().join(branch.replace('/', "--"))
    }

    /// Post to the human-visible inbox (spec §6 `shared/messages/`, spec §7:
    /// "every fatal lifecycle event posts a message in the human-visible
    /// inbox with the task id, reason, and link to the task log"). Distinct
    /// from [`threads::append_message`], which is per-task and gets deleted
    /// on accept; inbox entries are never deleted by a task transition.
    pub async fn post_inbox_message(&self, task_id: &str, reason: &str) -> Result<(), LifecycleError> {
        let log_path = self.task_log.log_path(task_id);
        foreman_db::queries::inbox::post(&self.pool, &self.scope, Some(task_id), reason, Some(&log_path.display().to_string())).await?;
        Ok(())
    }

    /// Run every not-yet-`passed` hook attached to `task` at `point` and
    /// persist each result via [`tasks::record_hook_evidence`] (invariant
    /// 6). Returns the row refreshed with the new hook statuses and
    /// version; a task with nothing pending at `point` is returned
    /// unchanged.
    async fn run_point_hooks(&self, task: &Task, point: foreman_db::models::HookPoint) -> Result<Task, LifecycleError> {
        use foreman_db::models::HookStatus;

        let pending: Vec<BuiltinHook> = task
            .hooks
            .0
            .iter()
            .filter(|h| h.point == point && h.status != HookStatus::Passed)
            .filter_map(|h| BuiltinHook::from_name(&h.name))
            .collect();

        if pending.is_empty() {
            return Ok(task.clone());
        }

        let ctx = HookContext {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            branch_name: WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref()),
            base_branch: task.branch.clone(),
            worktree_path: self.worktree_path(task),
            agent_name: "lifecycle".to_owned(),
            commits_count: task.commits_count,
            merge_method: task.merge_method.to_string(),
            pr_number: task.pr_number,
            extra: Default::default(),
        };

        let results = hooks::run_hooks(&pending, &ctx).await;

        let mut refreshed = task.clone();
        for (hook, result) in &results {
            let status = match result.outcome {
                HookOutcome::Success | HookOutcome::Skip => HookStatus::Passed,
                HookOutcome::Failure => HookStatus::Failed,
            };
            refreshed = tasks::record_hook_evidence(&self.pool, &self.scope, &task.id, hook.name(), status, Some(result.context.clone())).await?;
        }

        Ok(refreshed)
    }

    /// Create a task in `incoming`. Resolves hooks, merge method, and checks
    /// from the task-type config tier down to the built-in defaults (spec
    /// §4.5).
    pub async fn create(&self, input: NewTaskInput) -> Result<Task, LifecycleError> {
        let branch = input.branch.unwrap_or_else(|| self.config.base_branch.clone());
        let type_cfg = input.type_.as_deref().and_then(|t| self.config.task_types.get(t));

        let merge_method = type_cfg
            .and_then(|c| c.merge_method.as_deref())
            .and_then(|s| s.parse::<MergeMethod>().ok())
            .unwrap_or(MergeMethod::Squash);

        let checks = if !input.checks.is_empty() {
            input.checks
        } else {
            type_cfg.map(|c| c.checks.clone()).unwrap_or_default()
        };

        let resolved = hooks::resolve_hooks(input.type_.as_deref(), type_cfg.and_then(|c| c.hooks.as_ref()), &self.config.hooks);
        let hook_rows: Vec<Hook> = resolved
            .into_iter()
            .map(|(name, point, kind)| Hook::new(name, point, kind))
            .collect();

        if let Some(body) = &input.body {
            self.write_synthetic_brief(&input.id, &input.title, &input.role, &branch, body)?;
        }

        let new = NewTask {
            id: input.id,
            title: input.title,
            role: input.role,
            priority: input.priority,
            branch,
            flow: input.flow,
            type_: input.type_,
            blocked_by: Task::normalize_blocked_by(input.blocked_by.as_deref()),
            project_id: input.project_id,
            breakdown_id: input.breakdown_id,
            breakdown_depth: input.breakdown_depth,
            merge_method,
            hooks: hook_rows,
            checks,
            file_path: input.file_path,
            expedite: input.expedite,
            created_by: input.created_by,
        };

        let task = tasks::create_task(&self.pool, &self.scope, new).await?;
        self.task_log.log_created(&task.id, &task.created_by, &task.priority.to_string(), &task.role)?;
        Ok(task)
    }

    /// Write a brief file for a task created without a human-authored one
    /// (spec §6's header block, generated rather than hand-written).
    fn write_synthetic_brief(&self, id: &str, title: &str, role: &str, branch: &str, body: &str) -> Result<(), LifecycleError> {
        let path = self.worktree.repo_path().join(&self.config.file_operations.task_brief_dir).join(format!("{id}.md"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WorktreeError::GitCommand {
                message: format!("failed to create brief directory {}", parent.display()),
                source: e,
            })?;
        }
        let contents = format!("# [TASK-{id}] {title}\nROLE: {role}\nBRANCH: {branch}\n\n{body}");
        std::fs::write(&path, contents).map_err(|e| WorktreeError::GitCommand {
            message: format!("failed to write brief file {}", path.display()),
            source: e,
        })?;
        Ok(())
    }

    /// Claim the next eligible `incoming` task for `role` and prepare its
    /// worktree. Returns `None` if nothing is eligible.
    pub async fn claim(
        &self,
        role: &str,
        orchestrator_id: &str,
        lease: chrono::Duration,
    ) -> Result<Option<ClaimedTask>, LifecycleError> {
        let Some(task) = tasks::claim_next(&self.pool, &self.scope, role, orchestrator_id, lease).await? else {
            return Ok(None);
        };

        let branch_name = WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());
        let info = self.worktree.create_worktree(&branch_name, &task.branch)?;
        self.task_log.log_claimed(&task.id, orchestrator_id, task.attempt_count)?;

        Ok(Some(ClaimedTask {
            task,
            worktree_path: info.path,
            branch_name,
        }))
    }

    /// Move a `claimed` task to `provisional`. A submission with zero
    /// commits on a task that has already been claimed at all (invariant 3:
    /// `attempt_count` is bumped at claim time, so it's always > 0 once
    /// claimed) is treated as an empty turn and auto-rejected rather than
    /// handed to a human reviewer (spec §4.4).
    pub async fn submit(&self, task: &Task, commits_count: i32, turns_used: i32) -> Result<Task, LifecycleError> {
        if commits_count == 0 && (task.attempt_count > 0 || task.rejection_count > 0) {
            return self.reject(task, "submitted with no commits", "system").await;
        }

        let task = self.run_point_hooks(task, foreman_db::models::HookPoint::BeforeSubmit).await?;
        Self::check_hooks_passed(&task, foreman_db::models::HookPoint::BeforeSubmit)?;

        let submitted = tasks::submit_task(&self.pool, &self.scope, &task.id, task.version, commits_count, turns_used).await?;
        self.task_log.log_submitted(&task.id, commits_count, turns_used)?;
        Ok(submitted)
    }

    /// Accept a `provisional` task: moves to `done`, detaches its worktree
    /// without pushing (the branch has already been merged via the
    /// `before_merge` hooks), and clears its thread.
    pub async fn accept(&self, task: &Task) -> Result<Task, LifecycleError> {
        let task = self.run_point_hooks(task, foreman_db::models::HookPoint::BeforeMerge).await?;
        Self::check_hooks_passed(&task, foreman_db::models::HookPoint::BeforeMerge)?;

        let accepted = tasks::accept_task(&self.pool, &self.scope, &task.id, task.version).await?;

        let branch_name = WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());
        let worktree_path = self.worktree_path(&task);
        self.worktree.cleanup(&worktree_path, &branch_name, false)?;

        threads::delete_messages(&self.pool, &task.id).await?;
        self.task_log.log_accepted(&task.id, accepted.pr_number)?;
        Ok(accepted)
    }

    /// Reject a `provisional` task: records the feedback as a thread
    /// message, increments `rejection_count`, and moves the task back to
    /// `incoming` — or to `escalated` once the rotation cap
    /// (`queue_limits.max_rejections`) is reached. The worktree is pushed
    /// (not removed) so the rejected commits are preserved on `origin` for
    /// forensic review.
    pub async fn reject(&self, task: &Task, reason: &str, rejected_by: &str) -> Result<Task, LifecycleError> {
        threads::append_message(&self.pool, &task.id, rejected_by, ThreadRole::Rejection, reason).await?;

        let max_rejections = self.config.queue_limits.max_rejections as i32;
        let rejected = tasks::reject_task(&self.pool, &self.scope, &task.id, task.version, max_rejections).await?;

        let branch_name = WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());
        let worktree_path = self.worktree_path(task);
        self.worktree.cleanup(&worktree_path, &branch_name, true)?;

        self.task_log.log_rejected(&task.id, reason, rejected_by)?;

        if rejected.queue == Queue::Escalated {
            self.task_log.log_requeued(&task.id, "provisional", "escalated")?;
            let message = format!("escalated after {} rejections: {reason}", rejected.rejection_count);
            threads::append_message(&self.pool, &task.id, "system", ThreadRole::Escalation, &message).await?;
            self.post_inbox_message(&task.id, &message).await?;
        }

        Ok(rejected)
    }

    /// Move a burned-out task to `recycled` after its breakdown child has
    /// been created (Burnout & Recycler, spec §4.7). The caller is
    /// responsible for constructing the breakdown task itself via
    /// [`Self::create`]; this only closes out the parent.
    pub async fn recycle(&self, task: &Task, breakdown_id: &str) -> Result<Task, LifecycleError> {
        let recycled = tasks::recycle_task(&self.pool, &self.scope, &task.id, task.version).await?;
        self.task_log.log_recycled(&task.id, "burnout-recycler", Some(&format!("breakdown_id={breakdown_id}")))?;
        Ok(recycled)
    }

    /// Move a task straight to `breakdown` when it has exceeded the
    /// recycling depth cap (spec §4.7) rather than burning out again.
    pub async fn breakdown(&self, task: &Task) -> Result<Task, LifecycleError> {
        let moved = tasks::breakdown_task(&self.pool, &self.scope, &task.id, task.version).await?;
        self.task_log.log_requeued(&task.id, &task.queue.to_string(), "breakdown")?;
        Ok(moved)
    }

    /// Move a task to `failed`: terminal, no further attempts. The worktree
    /// is detached without pushing.
    pub async fn fail(&self, task: &Task, reason: &str) -> Result<Task, LifecycleError> {
        let branch_name = WorktreeManager::task_branch_name(&task.role, &task.id, task.breakdown_id.as_deref());
        let worktree_path = self.worktree_path(task);
        self.worktree.cleanup(&worktree_path, &branch_name, false)?;

        let failed = tasks::fail_task(&self.pool, &self.scope, &task.id, task.version).await?;
        self.task_log.log_failed(&task.id, reason)?;
        Ok(failed)
    }

    /// Record that an in-progress attempt ran out of turns/context without
    /// a verdict either way, so the next claim can pick it back up with the
    /// reason in hand.
    pub async fn mark_needs_continuation(&self, task: &Task, last_agent: &str, reason: &str) -> Result<Task, LifecycleError> {
        let updated = tasks::mark_needs_continuation(&self.pool, &self.scope, &task.id, task.version, last_agent, reason).await?;
        Ok(updated)
    }

    /// Apply a mutable-field patch (`priority`, `expedite`, `checks`) without
    /// touching queue state.
    pub async fn patch(&self, task: &Task, patch: &TaskPatch) -> Result<Task, LifecycleError> {
        let updated = tasks::update_task(&self.pool, &self.scope, &task.id, task.version, patch).await?;
        Ok(updated)
    }

    /// Invariant 6: before `claimed -> provisional`, every `before_submit`
    /// hook must be `passed`; before `provisional -> done`, every
    /// `before_merge` hook must be `passed`. Returns `PreconditionFailed`
    /// naming the offending hooks rather than letting the transition
    /// through silently.
    fn check_hooks_passed(task: &Task, point: foreman_db::models::HookPoint) -> Result<(), LifecycleError> {
        use foreman_db::models::HookStatus;

        let unmet: Vec<&str> = task
            .hooks
            .0
            .iter()
            .filter(|h| h.point == point)
            .filter(|h| h.status != HookStatus::Passed)
            .map(|h| h.name.as_str())
            .collect();

        if unmet.is_empty() {
            Ok(())
        } else {
            Err(StoreError::PreconditionFailed(format!("{point} hook(s) not passed: {}", unmet.join(", "))).into())
        }
    }

    /// The `before_submit`/`before_merge` hook names attached to `task`
    /// resolved to their [`BuiltinHook`] variants, in order. Unknown names
    /// (shouldn't happen — [`hooks::resolve_hooks`] already filters at
    /// creation) are skipped rather than causing the run to error.
    pub fn hooks_for(task: &Task, point: foreman_db::models::HookPoint) -> Vec<BuiltinHook> {
        task.hooks
            .0
            .iter()
            .filter(|h| h.point == point)
            .filter_map(|h| BuiltinHook::from_name(&h.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_for_filters_by_point() {
        use foreman_db::models::{HookPoint, HookType};

        let task_hooks = vec![
            Hook::new("create_pr", HookPoint::BeforeSubmit, HookType::Agent),
            Hook::new("merge_pr", HookPoint::BeforeMerge, HookType::Orchestrator),
        ];

        let mut task = sample_task();
        task.hooks = sqlx::types::Json(task_hooks);

        let before_submit = LifecycleController::hooks_for(&task, HookPoint::BeforeSubmit);
        assert_eq!(before_submit, vec![BuiltinHook::CreatePr]);

        let before_merge = LifecycleController::hooks_for(&task, HookPoint::BeforeMerge);
        assert_eq!(before_merge, vec![BuiltinHook::MergePr]);
    }

    fn sample_task() -> Task {
        Task {
            id: "t1".into(),
            title: "sample".into(),
            role: "builder".into(),
            priority: Priority::P2,
            branch: "main".into(),
            queue: Queue::Claimed,
            flow: "default".into(),
            type_: None,
            attempt_count: 1,
            rejection_count: 0,
            commits_count: 0,
            turns_used: 0,
            version: 1,
            claimed_by: None,
            orchestrator_id: None,
            claimed_at: None,
            lease_expires_at: None,
            blocked_by: None,
            project_id: None,
            breakdown_id: None,
            breakdown_depth: 0,
            pr_number: None,
            pr_url: None,
            merge_method: MergeMethod::Squash,
            hooks: sqlx::types::Json(vec![]),
            checks: sqlx::types::Json(vec![]),
            file_path: "tasks/t1.md".into(),
            expedite: false,
            needs_rebase: false,
            needs_rebase_at: None,
            last_agent: None,
            continuation_reason: None,
            created_by: "test".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
