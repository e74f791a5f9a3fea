//! Scheduler (spec §4.6): the single-process tick loop that launches agent
//! blueprints, reaps and reclaims dead claims, sweeps `provisional` for
//! ready `before_merge` hooks, and runs the background jobs (Burnout &
//! Recycler, Rebaser) on their own cadence.
//!
//! One tick does six things, in order: check the pause flag, snapshot the
//! queue counts, launch blueprints under backpressure, reap tracked agent
//! processes, sweep `provisional` for acceptance, then run due background
//! jobs. Nothing here decides pass/fail on a task's behalf; it only moves
//! work through the pipeline the Lifecycle Controller already defines.

pub mod agent_process;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Utc;
use foreman_db::models::{Queue, StoreError};
use foreman_db::queries::tasks::{self, TaskFilter};
use sqlx::PgPool;
use thiserror::Error;

use crate::burnout;
use crate::config::{Config, QueueLimits};
use crate::hooks;
use crate::lifecycle::{LifecycleController, LifecycleError};
use crate::rebaser;
use crate::tasklog::TaskLog;
use crate::worktree::WorktreeManager;

use agent_process::{AgentHandle, PollResult};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to spawn agent `{name}`: {source}")]
    Spawn { name: String, #[source] source: std::io::Error },
}

/// Queue counts for one tick, read once and reused by every backpressure
/// check that tick (spec §4.6 step 2).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSnapshot {
    pub incoming: i64,
    pub claimed: i64,
    pub provisional: i64,
}

impl QueueSnapshot {
    pub fn from_counts(rows: &[(String, i64)]) -> Self {
        let mut snapshot = Self::default();
        for (queue, count) in rows {
            match queue.as_str() {
                "incoming" => snapshot.incoming = *count,
                "claimed" => snapshot.claimed = *count,
                "provisional" => snapshot.provisional = *count,
                _ => {}
            }
        }
        snapshot
    }
}

/// Backpressure gate for claiming a task (spec §4.6). Returns the
/// pass/fail verdict plus a human-readable reason, since the scheduler logs
/// why a blueprint was skipped rather than just that it was.
pub fn can_claim_task(snapshot: QueueSnapshot, limits: &QueueLimits, open_prs: u32) -> (bool, &'static str) {
    if snapshot.incoming == 0 {
        return (false, "no incoming tasks");
    }
    if snapshot.claimed >= limits.max_claimed as i64 {
        return (false, "claimed queue at capacity");
    }
    if snapshot.provisional >= limits.max_provisional as i64 {
        return (false, "provisional queue at capacity");
    }
    if open_prs >= limits.max_open_prs {
        return (false, "open PR limit reached");
    }
    (true, "ok")
}

/// Backpressure gate for creating a new task (spec §4.6).
pub fn can_create_task(snapshot: QueueSnapshot, limits: &QueueLimits) -> (bool, &'static str) {
    if snapshot.incoming + snapshot.claimed >= limits.max_incoming as i64 {
        return (false, "incoming+claimed at capacity");
    }
    (true, "ok")
}

/// Whether the system-wide pause sentinel is present (spec §4.6 step 1;
/// creation/removal of the file is out-of-band, the scheduler only reads
/// it).
pub fn is_paused(state_dir: &Path) -> bool {
    state_dir.join("PAUSE").exists()
}

/// On-disk cache for the open-PR count, refreshed at most once per
/// `ttl_secs` so a busy tick loop doesn't hammer the host API (spec §4.6).
pub struct OpenPrCache {
    path: PathBuf,
    ttl_secs: u64,
}

impl OpenPrCache {
    pub fn new(state_dir: &Path, ttl_secs: u64) -> Self {
        Self { path: state_dir.join("open_prs.cache"), ttl_secs }
    }

    /// Current open-PR count, re-fetched from the host API only if the
    /// cache file is missing or older than `ttl_secs`.
    pub async fn get(&self) -> u32 {
        if let Some(value) = self.read_fresh() {
            return value;
        }
        let value = self.fetch().await.unwrap_or(0);
        let _ = std::fs::write(&self.path, value.to_string());
        value
    }

    fn read_fresh(&self) -> Option<u32> {
        let meta = std::fs::metadata(&self.path).ok()?;
        let age = meta.modified().ok()?.elapsed().unwrap_or(StdDuration::from_secs(u64::MAX));
        if age.as_secs() > self.ttl_secs {
            return None;
        }
        std::fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    async fn fetch(&self) -> Option<u32> {
        let (owner, repo) = hooks::builtin::repo_slug_from_env()?;
        let client = hooks::builtin::build_octocrab().ok()?;
        let page = client.pulls(&owner, &repo).list().state(octocrab::params::State::Open).send().await.ok()?;
        Some(page.items.len() as u32)
    }
}

/// One launched-and-tracked agent process per blueprint instance slot.
type HandleTable = HashMap<String, Vec<AgentHandle>>;

/// What happened over the course of one tick, returned for logging/tests.
#[derive(Debug, Default)]
pub struct TickReport {
    pub paused: bool,
    pub launched: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub reaped: Vec<(String, Option<i32>)>,
    pub zombies_reclaimed: Vec<String>,
    pub accepted: Vec<String>,
    pub left_for_human: Vec<String>,
    pub burnout: Vec<(String, burnout::RecycleOutcome)>,
    pub rebased: Vec<(String, rebaser::RebaseOutcome)>,
}

pub struct Scheduler {
    pool: PgPool,
    scope: String,
    config: Config,
    worktree: WorktreeManager,
    task_log: TaskLog,
    lifecycle: LifecycleController,
    orchestrator_id: String,
    state_dir: PathBuf,
    config_path: PathBuf,
    open_pr_cache: OpenPrCache,
    handles: HandleTable,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        config: Config,
        worktree: WorktreeManager,
        task_log: TaskLog,
        lifecycle: LifecycleController,
        orchestrator_id: String,
        config_path: PathBuf,
    ) -> Self {
        let state_dir = PathBuf::from(&config.server.state_dir);
        let open_pr_cache = OpenPrCache::new(&state_dir, config.jobs.open_prs_cache_secs);
        Self {
            scope: config.scope.clone(),
            pool,
            config,
            worktree,
            task_log,
            lifecycle,
            orchestrator_id,
            state_dir,
            config_path,
            open_pr_cache,
            handles: HashMap::new(),
        }
    }

    /// Run exactly one tick.
    pub async fn tick(&mut self) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::default();

        if is_paused(&self.state_dir) {
            report.paused = true;
            return Ok(report);
        }

        let counts = tasks::queue_counts(&self.pool, &self.scope).await?;
        let snapshot = QueueSnapshot::from_counts(&counts);

        self.launch_blueprints(snapshot, &mut report).await?;
        self.reap_processes(&mut report).await?;
        self.reclaim_zombies(&mut report).await?;
        self.sweep_provisional(&mut report).await?;
        self.run_background_jobs(&mut report).await?;

        Ok(report)
    }

    /// Propagate a SIGINT to every tracked agent process (spec §5). Claimed
    /// tasks are left as-is; their leases expire and get reclaimed through
    /// the normal zombie path rather than being force-released here.
    pub fn terminate_all(&self) {
        for handles in self.handles.values() {
            for handle in handles {
                if let Err(err) = handle.terminate() {
                    tracing::warn!(agent = %handle.blueprint_name, %err, "failed to signal agent process");
                }
            }
        }
    }

    async fn launch_blueprints(&mut self, snapshot: QueueSnapshot, report: &mut TickReport) -> Result<(), SchedulerError> {
        let open_prs = self.open_pr_cache.get().await;
        let blueprints = self.config.agents.clone();

        for (index, blueprint) in blueprints.iter().enumerate() {
            let running = self.handles.get(&blueprint.name).map(Vec::len).unwrap_or(0);
            if running >= blueprint.concurrency as usize {
                report.skipped.push((blueprint.name.clone(), "at max instances".to_owned()));
                continue;
            }

            let (ok, reason) = can_claim_task(snapshot, &self.config.queue_limits, open_prs);
            if !ok {
                report.skipped.push((blueprint.name.clone(), reason.to_owned()));
                continue;
            }

            let branch_name = WorktreeManager::agent_branch_name(&blueprint.name, Utc::now());
            refresh_origin(self.worktree.repo_path());
            let info = match self.worktree.create_worktree(&branch_name, &self.config.base_branch) {
                Ok(info) => info,
                Err(err) => {
                    report.skipped.push((blueprint.name.clone(), format!("worktree error: {err}")));
                    continue;
                }
            };

            let port = self.config.server.base_port + self.config.server.port_stride * index as u16;
            match agent_process::spawn(blueprint, &info.path, &self.orchestrator_id, None, port, &self.state_dir, &self.config_path) {
                Ok(handle) => {
                    report.launched.push(blueprint.name.clone());
                    self.handles.entry(blueprint.name.clone()).or_default().push(handle);
                }
                Err(source) => return Err(SchedulerError::Spawn { name: blueprint.name.clone(), source }),
            }
        }

        Ok(())
    }

    async fn reap_processes(&mut self, report: &mut TickReport) -> Result<(), SchedulerError> {
        for (name, handles) in self.handles.iter_mut() {
            let mut still_running = Vec::new();
            for mut handle in handles.drain(..) {
                match handle.poll() {
                    Ok(PollResult::Running) => still_running.push(handle),
                    Ok(PollResult::Exited(code)) => report.reaped.push((name.clone(), code)),
                    Err(err) => {
                        tracing::warn!(agent = %name, error = %err, "failed to poll agent process");
                        still_running.push(handle);
                    }
                }
            }
            *handles = still_running;
        }
        self.handles.retain(|_, v| !v.is_empty());
        Ok(())
    }

    async fn reclaim_zombies(&mut self, report: &mut TickReport) -> Result<(), SchedulerError> {
        for (name, handles) in self.handles.iter() {
            for handle in handles {
                let Some(pid) = handle.pid() else { continue };
                let alive = agent_process::process_alive(pid);
                let heartbeat = agent_process::read_heartbeat(&self.state_dir, name);
                if agent_process::is_zombie_claim(alive, heartbeat, Utc::now(), self.config.jobs.zombie_grace_secs) {
                    if let Some(task_id) = &handle.task_id {
                        tracing::warn!(agent = %name, task_id = %task_id, "releasing zombie claim");
                    }
                }
            }
        }

        let reclaimed = tasks::reclaim_zombies(&self.pool, &self.scope, Utc::now()).await?;
        for task_id in &reclaimed {
            if let Err(err) = self.task_log.log_requeued(task_id, "claimed", "incoming") {
                tracing::warn!(task_id = %task_id, error = %err, "failed to log zombie reclaim");
            }
        }
        report.zombies_reclaimed = reclaimed;
        Ok(())
    }

    /// For every `provisional` task, try to accept it: the Lifecycle
    /// Controller runs and persists any pending `before_merge` hooks itself
    /// and refuses the transition (`PreconditionFailed`) if one comes back
    /// failed, in which case the task is left for a human rather than
    /// treated as a hard tick error (spec §4.6 step 5).
    async fn sweep_provisional(&mut self, report: &mut TickReport) -> Result<(), SchedulerError> {
        let provisional = tasks::list_tasks(&self.pool, &self.scope, &TaskFilter { queue: Some(Queue::Provisional), ..Default::default() }).await?;

        for task in provisional {
            let task_id = task.id.clone();
            match self.lifecycle.accept(&task).await {
                Ok(_) => report.accepted.push(task_id),
                Err(LifecycleError::Store(StoreError::PreconditionFailed(_))) => report.left_for_human.push(task_id),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    /// Run the Burnout & Recycler and Rebaser every tick. Both are cheap,
    /// bounded-size sweeps (`provisional`/`needs_rebase` only) so no
    /// separate due-this-tick schedule is needed beyond the tick interval
    /// itself.
    async fn run_background_jobs(&mut self, report: &mut TickReport) -> Result<(), SchedulerError> {
        report.burnout = burnout::sweep(&self.pool, &self.scope, &self.config, &self.lifecycle).await?;
        report.rebased = rebaser::tick(&self.pool, &self.scope, &self.config, &self.worktree, &self.task_log, Utc::now()).await?;
        Ok(())
    }
}

fn refresh_origin(repo_path: &Path) {
    let result = std::process::Command::new("git").args(["fetch", "origin"]).current_dir(repo_path).output();
    if let Err(err) = result {
        tracing::warn!(error = %err, "scheduler could not refresh origin before launching blueprints");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> QueueLimits {
        QueueLimits {
            max_claimed: 5,
            max_provisional: 3,
            max_open_prs: 10,
            max_incoming: 200,
            max_rejections: 3,
        }
    }

    #[test]
    fn claim_blocked_when_incoming_empty() {
        let snapshot = QueueSnapshot { incoming: 0, claimed: 0, provisional: 0 };
        let (ok, reason) = can_claim_task(snapshot, &limits(), 0);
        assert!(!ok);
        assert_eq!(reason, "no incoming tasks");
    }

    #[test]
    fn claim_blocked_when_claimed_at_capacity() {
        let snapshot = QueueSnapshot { incoming: 5, claimed: 5, provisional: 0 };
        let (ok, _) = can_claim_task(snapshot, &limits(), 0);
        assert!(!ok);
    }

    #[test]
    fn claim_blocked_when_open_prs_at_cap() {
        let snapshot = QueueSnapshot { incoming: 5, claimed: 0, provisional: 0 };
        let (ok, reason) = can_claim_task(snapshot, &limits(), 10);
        assert!(!ok);
        assert_eq!(reason, "open PR limit reached");
    }

    #[test]
    fn claim_allowed_under_all_limits() {
        let snapshot = QueueSnapshot { incoming: 5, claimed: 1, provisional: 1 };
        let (ok, _) = can_claim_task(snapshot, &limits(), 0);
        assert!(ok);
    }

    #[test]
    fn create_blocked_at_incoming_cap() {
        let snapshot = QueueSnapshot { incoming: 150, claimed: 50, provisional: 0 };
        let (ok, _) = can_create_task(snapshot, &limits());
        assert!(!ok);
    }

    #[test]
    fn create_allowed_below_incoming_cap() {
        let snapshot = QueueSnapshot { incoming: 10, claimed: 5, provisional: 0 };
        let (ok, _) = can_create_task(snapshot, &limits());
        assert!(ok);
    }

    #[test]
    fn queue_snapshot_from_counts_ignores_unknown_queues() {
        let rows = vec![("incoming".to_owned(), 3), ("claimed".to_owned(), 1), ("done".to_owned(), 99)];
        let snapshot = QueueSnapshot::from_counts(&rows);
        assert_eq!(snapshot.incoming, 3);
        assert_eq!(snapshot.claimed, 1);
        assert_eq!(snapshot.provisional, 0);
    }

    #[test]
    fn pause_flag_absent_by_default() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!is_paused(dir.path()));
        std::fs::write(dir.path().join("PAUSE"), "").unwrap();
        assert!(is_paused(dir.path()));
    }
}
