mod context;
mod rebase_cmd;
mod scheduler_cmd;
mod status_cmd;
mod task_cmd;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use foreman_core::config;
use foreman_db::config::DbConfig;
use foreman_db::pool;

use scheduler_cmd::SchedulerCommands;
use task_cmd::TaskCommands;

#[derive(Parser)]
#[command(name = "foreman", about = "Task-lifecycle engine for orchestrating fleets of coding agents")]
struct Cli {
    /// Path to the git repository the Worktree Manager operates on.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Config file path (defaults to `$XDG_CONFIG_HOME/foreman/config.yaml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scope tag, overriding the config file and `FOREMAN_SCOPE`.
    #[arg(long, global = true)]
    scope: Option<String>,

    /// Orchestrator identity used for claims and spawned agents.
    #[arg(long, global = true)]
    orchestrator_id: Option<String>,

    /// PostgreSQL connection URL (overrides `FOREMAN_DATABASE_URL`).
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter foreman config file (no database required).
    Init {
        #[arg(long)]
        scope: String,
        #[arg(long)]
        force: bool,
    },
    /// Create the database (if needed) and run migrations.
    DbInit,
    /// Task lifecycle operations (create/claim/submit/accept/reject/...).
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Run the scheduler's tick loop.
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },
    /// Run one rebase pass over `needs_rebase` tasks.
    Rebase,
    /// Show queue counts, or one task's full detail when given an ID.
    Status { task_id: Option<String> },
    /// Show the human-visible inbox: escalations, depth-cap acceptances, and
    /// other fatal lifecycle events.
    Inbox,
}

fn cmd_init(scope: &str, force: bool) -> Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file = config::ConfigFile {
        scope: Some(scope.to_owned()),
        ..Default::default()
    };
    let yaml = serde_yaml::to_string(&file).context("failed to serialize config")?;
    std::fs::write(&path, yaml).with_context(|| format!("failed to write {}", path.display()))?;

    println!("Config written to {}", path.display());
    println!("  scope = {scope}");
    println!();
    println!("Next: run `foreman db-init` to create and migrate the database.");
    Ok(())
}

async fn cmd_db_init(database_url: Option<&str>) -> Result<()> {
    let db_config = match database_url {
        Some(url) => DbConfig::new(url),
        None => DbConfig::from_env(),
    };

    println!("Initializing foreman database...");
    pool::ensure_database_exists(&db_config).await?;

    let db_pool = pool::create_pool(&db_config).await?;
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("foreman db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Commands::Init { scope, force } = &cli.command {
        return cmd_init(scope, *force);
    }
    if let Commands::DbInit = &cli.command {
        return cmd_db_init(cli.database_url.as_deref()).await;
    }

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let ctx = context::bootstrap(&cli.repo, &config_path, cli.scope.as_deref(), cli.database_url.as_deref()).await?;

    let result = match cli.command {
        Commands::Init { .. } | Commands::DbInit => unreachable!("handled above"),
        Commands::Task { command } => task_cmd::run(&ctx, command).await,
        Commands::Scheduler { command } => {
            let orchestrator_id = cli.orchestrator_id.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
            scheduler_cmd::run(&ctx, command, orchestrator_id, config_path).await
        }
        Commands::Rebase => rebase_cmd::run(&ctx).await,
        Commands::Status { task_id } => status_cmd::run(&ctx, task_id.as_deref()).await,
        Commands::Inbox => status_cmd::show_inbox(&ctx).await,
    };

    ctx.pool.close().await;
    result
}
