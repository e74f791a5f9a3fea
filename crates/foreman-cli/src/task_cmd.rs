//! `foreman task` subcommands: the CLI-facing surface of the Lifecycle
//! Controller (spec §4.4). Each verb maps directly onto one controller
//! method; the glue here is fetching the current row (for its `version`)
//! and printing the result.

use anyhow::{Context, Result, bail};
use clap::Subcommand;

use foreman_db::models::{Priority, Queue, Task};
use foreman_db::queries::tasks::{self, TaskFilter, TaskPatch};

use crate::context::Cli;

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task in `incoming`.
    Create {
        /// Short hex task ID (at least 8 characters).
        id: String,
        title: String,
        /// Role the task is claimed by (e.g. builder, reviewer).
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "P2")]
        priority: String,
        /// Base branch to fork from (defaults to the configured base branch).
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, default_value = "default")]
        flow: String,
        #[arg(long = "type")]
        type_: Option<String>,
        #[arg(long)]
        blocked_by: Option<String>,
        #[arg(long)]
        project_id: Option<uuid::Uuid>,
        #[arg(long)]
        breakdown_id: Option<String>,
        #[arg(long, default_value_t = 0)]
        breakdown_depth: i32,
        /// Comma-separated check names, overriding the task-type default.
        #[arg(long)]
        checks: Option<String>,
        /// Brief file path, relative to the repo root.
        #[arg(long)]
        file_path: Option<String>,
        #[arg(long)]
        expedite: bool,
        #[arg(long, default_value = "human")]
        created_by: String,
        /// Brief body text, written to `file_path` if given (for tasks with
        /// no pre-existing, human-authored brief file on disk).
        #[arg(long)]
        body: Option<String>,
    },
    /// Claim the next eligible `incoming` task for a role.
    Claim {
        #[arg(long)]
        role: String,
        #[arg(long)]
        orchestrator_id: String,
        #[arg(long, default_value_t = 3600)]
        lease_secs: i64,
    },
    /// Move a `claimed` task to `provisional`.
    Submit {
        task_id: String,
        #[arg(long, default_value_t = 0)]
        commits: i32,
        #[arg(long, default_value_t = 0)]
        turns: i32,
    },
    /// Accept a `provisional` task into `done`.
    Accept { task_id: String },
    /// Reject a `provisional` task back to `incoming` (or `escalated`).
    Reject {
        task_id: String,
        reason: String,
        #[arg(long, default_value = "human")]
        by: String,
    },
    /// Move a burned-out task to `recycled` once its breakdown child exists.
    Recycle {
        task_id: String,
        breakdown_id: String,
    },
    /// Move a task directly to `breakdown` (depth cap reached).
    Breakdown { task_id: String },
    /// Move a task to `failed`.
    Fail { task_id: String, reason: String },
    /// Patch mutable fields (priority, expedite, checks) in place.
    Patch {
        task_id: String,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        expedite: Option<bool>,
        #[arg(long)]
        checks: Option<String>,
    },
    /// Show one task.
    Show {
        task_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List tasks, optionally filtered.
    List {
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long = "type")]
        type_: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(cli: &Cli, command: TaskCommands) -> Result<()> {
    match command {
        TaskCommands::Create {
            id,
            title,
            role,
            priority,
            branch,
            flow,
            type_,
            blocked_by,
            project_id,
            breakdown_id,
            breakdown_depth,
            checks,
            file_path,
            expedite,
            created_by,
            body,
        } => {
            let priority: Priority = priority.parse().with_context(|| format!("invalid priority {priority:?}"))?;
            let checks = checks.map(|s| s.split(',').map(str::to_owned).collect()).unwrap_or_default();
            let file_path = file_path.unwrap_or_else(|| format!("{}/{id}.md", cli.config.file_operations.task_brief_dir));

            let input = foreman_core::lifecycle::NewTaskInput {
                id,
                title,
                role,
                priority,
                branch,
                flow,
                type_,
                blocked_by,
                project_id,
                breakdown_id,
                breakdown_depth,
                checks,
                file_path,
                expedite,
                created_by,
                body,
            };
            let task = cli.lifecycle.create(input).await?;
            print_task(&task);
        }
        TaskCommands::Claim { role, orchestrator_id, lease_secs } => {
            let claimed = cli.lifecycle.claim(&role, &orchestrator_id, chrono::Duration::seconds(lease_secs)).await?;
            match claimed {
                Some(c) => {
                    println!("claimed {} -> {}", c.task.id, c.worktree_path.display());
                    print_task(&c.task);
                }
                None => println!("nothing eligible for role {role:?}"),
            }
        }
        TaskCommands::Submit { task_id, commits, turns } => {
            let task = fetch(cli, &task_id).await?;
            let updated = cli.lifecycle.submit(&task, commits, turns).await?;
            print_task(&updated);
        }
        TaskCommands::Accept { task_id } => {
            let task = fetch(cli, &task_id).await?;
            let updated = cli.lifecycle.accept(&task).await?;
            print_task(&updated);
        }
        TaskCommands::Reject { task_id, reason, by } => {
            let task = fetch(cli, &task_id).await?;
            let updated = cli.lifecycle.reject(&task, &reason, &by).await?;
            print_task(&updated);
        }
        TaskCommands::Recycle { task_id, breakdown_id } => {
            let task = fetch(cli, &task_id).await?;
            let updated = cli.lifecycle.recycle(&task, &breakdown_id).await?;
            print_task(&updated);
        }
        TaskCommands::Breakdown { task_id } => {
            let task = fetch(cli, &task_id).await?;
            let updated = cli.lifecycle.breakdown(&task).await?;
            print_task(&updated);
        }
        TaskCommands::Fail { task_id, reason } => {
            let task = fetch(cli, &task_id).await?;
            let updated = cli.lifecycle.fail(&task, &reason).await?;
            print_task(&updated);
        }
        TaskCommands::Patch { task_id, priority, expedite, checks } => {
            let task = fetch(cli, &task_id).await?;
            let priority = priority.map(|p| p.parse()).transpose().context("invalid priority")?;
            let checks = checks.map(|s| s.split(',').map(str::to_owned).collect());
            let patch = TaskPatch { priority, expedite, checks };
            let updated = cli.lifecycle.patch(&task, &patch).await?;
            print_task(&updated);
        }
        TaskCommands::Show { task_id, json } => {
            let task = fetch(cli, &task_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print_task(&task);
            }
        }
        TaskCommands::List { queue, role, type_, json } => {
            let queue = queue.map(|q| q.parse::<Queue>()).transpose().context("invalid queue")?;
            let filter = TaskFilter { queue, role, type_ };
            let found = tasks::list_tasks(&cli.pool, &cli.config.scope, &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else if found.is_empty() {
                println!("no tasks match");
            } else {
                println!("{:<10} {:<10} {:<12} {:<4} {:<20} {}", "ID", "QUEUE", "ROLE", "PRI", "TYPE", "TITLE");
                for task in &found {
                    println!(
                        "{:<10} {:<10} {:<12} {:<4} {:<20} {}",
                        task.id,
                        task.queue,
                        task.role,
                        task.priority,
                        task.type_.as_deref().unwrap_or("-"),
                        task.title,
                    );
                }
            }
        }
    }

    Ok(())
}

async fn fetch(cli: &Cli, task_id: &str) -> Result<Task> {
    match tasks::get_task(&cli.pool, &cli.config.scope, task_id).await {
        Ok(task) => Ok(task),
        Err(foreman_db::models::StoreError::NotFound(id)) => bail!("task {id} not found"),
        Err(err) => Err(err.into()),
    }
}

fn print_task(task: &Task) {
    println!(
        "{} [{}] {} role={} priority={} attempt={} rejections={} version={}",
        task.id, task.queue, task.title, task.role, task.priority, task.attempt_count, task.rejection_count, task.version,
    );
}
