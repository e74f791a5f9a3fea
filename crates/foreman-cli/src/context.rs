//! Shared setup for every subcommand: resolve config, open a pool, and wire
//! up the Lifecycle Controller and its collaborators the same way for every
//! command so `main.rs` itself stays a thin dispatch table.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use sqlx::PgPool;

use foreman_core::config::Config;
use foreman_core::{LifecycleController, TaskLog, WorktreeManager};
use foreman_db::config::DbConfig;
use foreman_db::pool;

pub struct Cli {
    pub pool: PgPool,
    pub config: Config,
    pub lifecycle: LifecycleController,
    pub worktree: WorktreeManager,
    pub task_log: TaskLog,
}

/// Resolve config/db/worktree/task-log and return everything a command
/// needs. `repo_path` is the git repo the Worktree Manager operates on;
/// `config_path`/`scope` override the config layer's usual resolution chain.
pub async fn bootstrap(
    repo_path: &Path,
    config_path: &Path,
    scope: Option<&str>,
    database_url: Option<&str>,
) -> Result<Cli> {
    let config = Config::resolve(config_path, scope).context("failed to resolve foreman config")?;

    let db_config = match database_url {
        Some(url) => DbConfig::new(url),
        None => DbConfig::from_env(),
    };
    let db_pool = pool::create_pool(&db_config).await?;

    let worktree_base = PathBuf::from(&config.server.state_dir).join("worktrees");
    let worktree = WorktreeManager::new(repo_path, Some(worktree_base))
        .with_context(|| format!("{} is not a git repository", repo_path.display()))?;

    let task_log = TaskLog::new(config.server.state_dir.clone());
    let lifecycle = LifecycleController::new(db_pool.clone(), config.clone(), task_log.clone(), worktree.clone());

    Ok(Cli {
        pool: db_pool,
        config,
        lifecycle,
        worktree,
        task_log,
    })
}
