//! Task Store Client: the `tasks` table's CRUD plus claim/submit/accept/
//! reject/recycle operations, each scope-mandatory and version-CAS guarded.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::models::{Hook, HookStatus, MergeMethod, Priority, Queue, StoreError, Task};

/// Fields supplied by the caller when creating a task. Server-generated
/// fields (`version`, `created_at`, `updated_at`, counters) are not
/// included.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub title: String,
    pub role: String,
    pub priority: Priority,
    pub branch: String,
    pub flow: String,
    pub type_: Option<String>,
    pub blocked_by: Option<String>,
    pub project_id: Option<uuid::Uuid>,
    pub breakdown_id: Option<String>,
    pub breakdown_depth: i32,
    pub merge_method: MergeMethod,
    pub hooks: Vec<Hook>,
    pub checks: Vec<String>,
    pub file_path: String,
    pub expedite: bool,
    pub created_by: String,
}

/// Create a task in the `incoming` queue. `scope` is mandatory and tags the
/// row for every later lookup (spec §4.1: "Scope" is the multi-tenancy
/// boundary). `blocked_by` must already be normalized by the caller
/// (`None`/`""`/`"None"` all mean "no blocker", see
/// [`Task::normalize_blocked_by`]) — the store rejects the literal string
/// `"None"` rather than silently normalizing it, so a caller that forgets
/// to normalize fails loudly instead of writing a garbage blocker id.
pub async fn create_task(pool: &PgPool, scope: &str, new: NewTask) -> Result<Task, StoreError> {
    if scope.is_empty() {
        return Err(StoreError::InvalidArgument("scope must not be empty".into()));
    }
    if new.blocked_by.as_deref() == Some("None") {
        return Err(StoreError::InvalidArgument(
            "blocked_by must be normalized to null before calling create_task, not the literal string \"None\"".into(),
        ));
    }

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (
            id, scope, title, role, priority, branch, queue, flow, task_type,
            blocked_by, project_id, breakdown_id, breakdown_depth,
            merge_method, hooks, checks, file_path, expedite, created_by
         ) VALUES (
            $1, $2, $3, $4, $5, $6, 'incoming', $7, $8,
            $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18
         ) RETURNING *",
    )
    .bind(&new.id)
    .bind(scope)
    .bind(&new.title)
    .bind(&new.role)
    .bind(new.priority)
    .bind(&new.branch)
    .bind(&new.flow)
    .bind(&new.type_)
    .bind(&new.blocked_by)
    .bind(new.project_id)
    .bind(&new.breakdown_id)
    .bind(new.breakdown_depth)
    .bind(new.merge_method)
    .bind(sqlx::types::Json(&new.hooks))
    .bind(sqlx::types::Json(&new.checks))
    .bind(&new.file_path)
    .bind(new.expedite)
    .bind(&new.created_by)
    .fetch_one(pool)
    .await?;

    Ok(task)
}

/// Fetch a single task by id, scoped.
pub async fn get_task(pool: &PgPool, scope: &str, id: &str) -> Result<Task, StoreError> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND scope = $2")
        .bind(id)
        .bind(scope)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_owned()))
}

/// Filters accepted by [`list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub queue: Option<Queue>,
    pub role: Option<String>,
    pub type_: Option<String>,
}

/// List tasks in scope matching `filter`, ordered per spec §4.4: expedited
/// first, then priority ascending (`P0` highest), then `created_at`
/// ascending.
pub async fn list_tasks(pool: &PgPool, scope: &str, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
    let queue = filter.queue.map(|q| q.to_string());
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE scope = $1 \
           AND ($2::text IS NULL OR queue = $2) \
           AND ($3::text IS NULL OR role = $3) \
           AND ($4::text IS NULL OR task_type = $4) \
         ORDER BY expedite DESC, priority ASC, created_at ASC",
    )
    .bind(scope)
    .bind(queue)
    .bind(&filter.role)
    .bind(&filter.type_)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

/// Atomically claim the next eligible `incoming` task for `role` whose
/// blockers (if any) are all in an accepting queue (`done`/`cancelled`),
/// moving it to `claimed` with a lease. Returns `None` if nothing is
/// eligible — this is not an error, the caller backs off.
pub async fn claim_next(
    pool: &PgPool,
    scope: &str,
    role: &str,
    orchestrator_id: &str,
    lease: Duration,
) -> Result<Option<Task>, StoreError> {
    let mut tx = pool.begin().await?;

    let candidate = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         WHERE t.scope = $1 AND t.role = $2 AND t.queue = 'incoming' \
           AND NOT EXISTS ( \
               SELECT 1 FROM unnest(string_to_array(t.blocked_by, ',')) AS blocker_id \
               JOIN tasks b ON b.id = trim(blocker_id) AND b.scope = t.scope \
               WHERE t.blocked_by IS NOT NULL AND b.queue NOT IN ('done', 'cancelled') \
           ) \
         ORDER BY t.expedite DESC, t.priority ASC, t.created_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(scope)
    .bind(role)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(candidate) = candidate else {
        tx.commit().await?;
        return Ok(None);
    };

    let claimed_at = Utc::now();
    let lease_expires_at = claimed_at + lease;

    let claimed = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET queue = 'claimed', \
             claimed_by = $1, orchestrator_id = $2, \
             claimed_at = $3, lease_expires_at = $4, \
             attempt_count = attempt_count + 1, \
             version = version + 1, updated_at = now() \
         WHERE id = $5 AND version = $6 \
         RETURNING *",
    )
    .bind(role)
    .bind(orchestrator_id)
    .bind(claimed_at)
    .bind(lease_expires_at)
    .bind(&candidate.id)
    .bind(candidate.version)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    claimed.map(Some).ok_or(StoreError::Conflict {
        task_id: candidate.id,
        expected: candidate.version,
        actual: candidate.version + 1,
    })
}

/// Move a `claimed` task into `provisional`, recording outcome metadata
/// left by the agent process (commit count, turns used).
pub async fn submit_task(
    pool: &PgPool,
    scope: &str,
    id: &str,
    version: i64,
    commits_count: i32,
    turns_used: i32,
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET queue = 'provisional', commits_count = $1, turns_used = $2, \
             version = version + 1, updated_at = now() \
         WHERE id = $3 AND scope = $4 AND version = $5 \
         RETURNING *",
    )
    .bind(commits_count)
    .bind(turns_used)
    .bind(id)
    .bind(scope)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    task.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: version,
        actual: version + 1,
    })
}

/// Accept a `provisional` task: moves to `done`.
pub async fn accept_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "done", &[]).await
}

/// Reject a `provisional` task, incrementing the rejection counter: goes
/// back to `incoming` with `claimed_by` cleared, unless `rejection_count`
/// has now reached `max_rejections`, in which case it moves to `escalated`
/// instead (spec §4.9; rejected tasks never rest in a `rejected` queue,
/// that state is reserved for a direct administrative reject). Feedback is
/// recorded separately as a thread message, not folded into this row.
pub async fn reject_task(
    pool: &PgPool,
    scope: &str,
    id: &str,
    version: i64,
    max_rejections: i32,
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET queue = CASE WHEN rejection_count + 1 >= $1 THEN 'escalated' ELSE 'incoming' END, \
             rejection_count = rejection_count + 1, \
             claimed_by = CASE WHEN rejection_count + 1 >= $1 THEN claimed_by ELSE NULL END, \
             version = version + 1, updated_at = now() \
         WHERE id = $2 AND scope = $3 AND version = $4 \
         RETURNING *",
    )
    .bind(max_rejections)
    .bind(id)
    .bind(scope)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    task.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: version,
        actual: version + 1,
    })
}

/// Move a task to `recycled` (burnout & recycler, spec §4.7).
pub async fn recycle_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "recycled", &[]).await
}

/// Move a task to `breakdown` (burnout exceeded recycling depth cap).
pub async fn breakdown_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "breakdown", &[]).await
}

/// Move a task to `failed`.
pub async fn fail_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "failed", &[]).await
}

/// Move a task to `blocked`.
pub async fn block_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "blocked", &[]).await
}

/// Move a task to `cancelled`.
pub async fn cancel_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "cancelled", &[]).await
}

/// Move a task to `escalated` (rejection cap reached, spec §4.9). Unlike
/// every other transition this one is terminal-bound: an escalated task
/// never returns to `incoming` on its own.
pub async fn escalate_task(pool: &PgPool, scope: &str, id: &str, version: i64) -> Result<Task, StoreError> {
    simple_queue_transition(pool, scope, id, version, "escalated", &[]).await
}

/// Record the pull request a `before_merge` `create_pr`/`merge_pr` hook
/// produced, without otherwise touching the task's queue.
pub async fn set_pr_info(
    pool: &PgPool,
    scope: &str,
    id: &str,
    version: i64,
    pr_number: i32,
    pr_url: &str,
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET pr_number = $1, pr_url = $2, version = version + 1, updated_at = now() \
         WHERE id = $3 AND scope = $4 AND version = $5 \
         RETURNING *",
    )
    .bind(pr_number)
    .bind(pr_url)
    .bind(id)
    .bind(scope)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    task.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: version,
        actual: version + 1,
    })
}

/// Clear resolved blocker ids from every blocked task in scope (Burnout &
/// Recycler, spec §4.7): a blocker counts as resolved once it reaches an
/// accepting queue (`done`/`cancelled`). Tasks left with no blockers have
/// `blocked_by` cleared entirely, making them claimable. Returns the ids of
/// tasks whose `blocked_by` changed.
pub async fn reconcile_stale_blockers(pool: &PgPool, scope: &str) -> Result<Vec<String>, StoreError> {
    let blocked = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE scope = $1 AND blocked_by IS NOT NULL",
    )
    .bind(scope)
    .fetch_all(pool)
    .await?;

    let mut changed = Vec::new();

    for task in blocked {
        let blocker_ids: Vec<String> = task.blocker_ids().into_iter().map(str::to_owned).collect();
        let mut still_blocking = Vec::new();
        for blocker_id in &blocker_ids {
            let blocker = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND scope = $2")
                .bind(blocker_id)
                .bind(scope)
                .fetch_optional(pool)
                .await?;
            match blocker {
                Some(b) if b.queue.is_accepting() => {}
                _ => still_blocking.push(blocker_id.clone()),
            }
        }

        if still_blocking.len() == blocker_ids.len() {
            continue;
        }

        let new_blocked_by = if still_blocking.is_empty() {
            None
        } else {
            Some(still_blocking.join(","))
        };

        sqlx::query(
            "UPDATE tasks SET blocked_by = $1, version = version + 1, updated_at = now() \
             WHERE id = $2 AND scope = $3 AND version = $4",
        )
        .bind(&new_blocked_by)
        .bind(&task.id)
        .bind(scope)
        .bind(task.version)
        .execute(pool)
        .await?;

        changed.push(task.id);
    }

    Ok(changed)
}

async fn simple_queue_transition(
    pool: &PgPool,
    scope: &str,
    id: &str,
    version: i64,
    queue: &str,
    _reserved: &[()],
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET queue = $1, version = version + 1, updated_at = now() \
         WHERE id = $2 AND scope = $3 AND version = $4 \
         RETURNING *",
    )
    .bind(queue)
    .bind(id)
    .bind(scope)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    task.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: version,
        actual: version + 1,
    })
}

/// Record that a task needs a continuation turn (context/turn limit hit
/// mid-attempt, distinct from a failure) instead of claiming it as done.
pub async fn mark_needs_continuation(
    pool: &PgPool,
    scope: &str,
    id: &str,
    version: i64,
    last_agent: &str,
    continuation_reason: &str,
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET queue = 'needs_continuation', last_agent = $1, continuation_reason = $2, \
             version = version + 1, updated_at = now() \
         WHERE id = $3 AND scope = $4 AND version = $5 \
         RETURNING *",
    )
    .bind(last_agent)
    .bind(continuation_reason)
    .bind(id)
    .bind(scope)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    task.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: version,
        actual: version + 1,
    })
}

/// Generic field patch used by `task update`. Only `priority`, `checks`,
/// and `expedite` are mutable post-creation per spec — everything else
/// flows only through the dedicated lifecycle operations above.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub priority: Option<Priority>,
    pub expedite: Option<bool>,
    pub checks: Option<Vec<String>>,
}

pub async fn update_task(
    pool: &PgPool,
    scope: &str,
    id: &str,
    version: i64,
    patch: &TaskPatch,
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET priority = COALESCE($1, priority), \
             expedite = COALESCE($2, expedite), \
             checks = COALESCE($3, checks), \
             version = version + 1, updated_at = now() \
         WHERE id = $4 AND scope = $5 AND version = $6 \
         RETURNING *",
    )
    .bind(patch.priority)
    .bind(patch.expedite)
    .bind(patch.checks.as_ref().map(sqlx::types::Json))
    .bind(id)
    .bind(scope)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    task.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: version,
        actual: version + 1,
    })
}

pub async fn delete_task(pool: &PgPool, scope: &str, id: &str) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND scope = $2")
        .bind(id)
        .bind(scope)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(id.to_owned()));
    }
    Ok(())
}

/// Merge one hook's status/evidence into a task's `hooks` JSON column
/// in-place, leaving other hooks untouched.
pub async fn record_hook_evidence(
    pool: &PgPool,
    scope: &str,
    id: &str,
    hook_name: &str,
    status: HookStatus,
    evidence: Option<serde_json::Value>,
) -> Result<Task, StoreError> {
    let task = get_task(pool, scope, id).await?;
    let mut hooks = task.hooks.0.clone();
    let Some(hook) = hooks.iter_mut().find(|h| h.name == hook_name) else {
        return Err(StoreError::InvalidArgument(format!(
            "task {id} has no hook named {hook_name}"
        )));
    };
    hook.status = status;
    hook.evidence = evidence;

    let updated = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET hooks = $1, version = version + 1, updated_at = now() \
         WHERE id = $2 AND scope = $3 AND version = $4 \
         RETURNING *",
    )
    .bind(sqlx::types::Json(&hooks))
    .bind(id)
    .bind(scope)
    .bind(task.version)
    .fetch_optional(pool)
    .await?;

    updated.ok_or(StoreError::Conflict {
        task_id: id.to_owned(),
        expected: task.version,
        actual: task.version + 1,
    })
}

/// Set the `needs_rebase` flag (rebaser trigger, spec §4.8).
pub async fn mark_needs_rebase(pool: &PgPool, scope: &str, id: &str) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE tasks SET needs_rebase = true, needs_rebase_at = now(), \
         version = version + 1, updated_at = now() WHERE id = $1 AND scope = $2",
    )
    .bind(id)
    .bind(scope)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear_rebase_flag(pool: &PgPool, scope: &str, id: &str) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE tasks SET needs_rebase = false, needs_rebase_at = NULL, \
         version = version + 1, updated_at = now() WHERE id = $1 AND scope = $2",
    )
    .bind(id)
    .bind(scope)
    .execute(pool)
    .await?;
    Ok(())
}

/// List tasks flagged for rebase, oldest flag first (used by the
/// Rebaser's throttled tick).
pub async fn list_needs_rebase(pool: &PgPool, scope: &str) -> Result<Vec<Task>, StoreError> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE scope = $1 AND needs_rebase = true \
         ORDER BY needs_rebase_at ASC",
    )
    .bind(scope)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

/// Reclaim tasks whose lease has expired: move `claimed` back to
/// `incoming`, clearing claim metadata. Returns the reclaimed task ids.
pub async fn reclaim_zombies(pool: &PgPool, scope: &str, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE tasks \
         SET queue = 'incoming', claimed_by = NULL, orchestrator_id = NULL, \
             claimed_at = NULL, lease_expires_at = NULL, \
             version = version + 1, updated_at = now() \
         WHERE scope = $1 AND queue = 'claimed' AND lease_expires_at < $2 \
         RETURNING id",
    )
    .bind(scope)
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Count tasks per queue for scope, used by the Scheduler's backpressure
/// gates (spec §4.6).
pub async fn queue_counts(pool: &PgPool, scope: &str) -> Result<Vec<(String, i64)>, StoreError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT queue::text, COUNT(*) FROM tasks WHERE scope = $1 GROUP BY queue",
    )
    .bind(scope)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_new_task(id: &str) -> NewTask {
        NewTask {
            id: id.to_owned(),
            title: "do the thing".into(),
            role: "builder".into(),
            priority: Priority::P1,
            branch: "task/do-the-thing".into(),
            flow: "default".into(),
            type_: None,
            blocked_by: None,
            project_id: None,
            breakdown_id: None,
            breakdown_depth: 0,
            merge_method: MergeMethod::Squash,
            hooks: vec![],
            checks: vec![],
            file_path: format!("tasks/{id}.md"),
            expedite: false,
            created_by: "test".into(),
        }
    }

    #[test]
    fn normalize_blocked_by_is_used_for_none_and_empty() {
        let mut new = sample_new_task("t1");
        new.blocked_by = Some(String::new());
        assert_eq!(Task::normalize_blocked_by(new.blocked_by.as_deref()), None);
        new.blocked_by = Some("None".into());
        assert_eq!(Task::normalize_blocked_by(new.blocked_by.as_deref()), None);
    }
}
