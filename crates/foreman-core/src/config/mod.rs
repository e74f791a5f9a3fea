//! Config Layer (spec §4.10): a single YAML file read once per scheduler
//! tick, resolved through the chain CLI flag > env var > file > default.
//!
//! `scope` has no default — a missing scope is a fatal configuration error,
//! since every Task Store Client call is scope-mandatory (spec §4.1).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} could not be read")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("config file {0} is not valid YAML")]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("`scope` is required and was not set by any CLI flag, FOREMAN_SCOPE, or config file")]
    MissingScope,
}

/// Per-queue backpressure limits (spec §4.6), plus the rejection rotation
/// cap (spec §4.9) since both gate how a task moves through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueLimits {
    #[serde(default = "default_max_claimed")]
    pub max_claimed: u32,
    #[serde(default = "default_max_provisional")]
    pub max_provisional: u32,
    #[serde(default = "default_max_open_prs")]
    pub max_open_prs: u32,
    #[serde(default = "default_max_incoming")]
    pub max_incoming: u32,
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
}

fn default_max_claimed() -> u32 {
    5
}
fn default_max_provisional() -> u32 {
    3
}
fn default_max_open_prs() -> u32 {
    10
}
fn default_max_incoming() -> u32 {
    200
}
fn default_max_rejections() -> u32 {
    3
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_claimed: default_max_claimed(),
            max_provisional: default_max_provisional(),
            max_open_prs: default_max_open_prs(),
            max_incoming: default_max_incoming(),
            max_rejections: default_max_rejections(),
        }
    }
}

/// Background-job timing knobs shared by the Scheduler, Burnout & Recycler,
/// and Rebaser (spec §4.6-§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_burnout_turns_threshold")]
    pub burnout_turns_threshold: i32,
    #[serde(default = "default_max_breakdown_depth")]
    pub max_breakdown_depth: i32,
    #[serde(default = "default_rebase_cooldown_secs")]
    pub rebase_cooldown_secs: i64,
    #[serde(default = "default_zombie_grace_secs")]
    pub zombie_grace_secs: i64,
    #[serde(default = "default_open_prs_cache_secs")]
    pub open_prs_cache_secs: u64,
}

fn default_burnout_turns_threshold() -> i32 {
    60
}
fn default_max_breakdown_depth() -> i32 {
    3
}
fn default_rebase_cooldown_secs() -> i64 {
    600
}
fn default_zombie_grace_secs() -> i64 {
    300
}
fn default_open_prs_cache_secs() -> u64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            burnout_turns_threshold: default_burnout_turns_threshold(),
            max_breakdown_depth: default_max_breakdown_depth(),
            rebase_cooldown_secs: default_rebase_cooldown_secs(),
            zombie_grace_secs: default_zombie_grace_secs(),
            open_prs_cache_secs: default_open_prs_cache_secs(),
        }
    }
}

/// Hooks to run at each lifecycle point, by name (spec §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub before_submit: Vec<String>,
    #[serde(default)]
    pub before_merge: Vec<String>,
}

/// Per-task-type overrides (e.g. a different merge method, checks list, or
/// hook resolution, spec §4.5's "task_type override" tier).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTypeConfig {
    #[serde(default)]
    pub merge_method: Option<String>,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub hooks: Option<HookConfig>,
}

/// Shell command templates the Hook Engine's builtins resolve against
/// before falling back to auto-detection (spec §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub lint: Option<String>,
}

/// Where on disk task briefs and worktrees live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperationsConfig {
    #[serde(default = "default_task_brief_dir")]
    pub task_brief_dir: String,
}

fn default_task_brief_dir() -> String {
    "tasks".to_owned()
}

impl Default for FileOperationsConfig {
    fn default() -> Self {
        Self {
            task_brief_dir: default_task_brief_dir(),
        }
    }
}

/// Scheduler process settings (spec §4.6/§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_port_stride")]
    pub port_stride: u16,
}

fn default_state_dir() -> String {
    ".foreman".to_owned()
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_base_port() -> u16 {
    9500
}
fn default_port_stride() -> u16 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tick_interval_secs: default_tick_interval_secs(),
            base_port: default_base_port(),
            port_stride: default_port_stride(),
        }
    }
}

/// One configured agent blueprint the Scheduler can launch (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBlueprint {
    pub name: String,
    pub role: String,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

/// The file-shape config as loaded from YAML. `scope` is optional here so
/// it can instead come from a CLI flag or `FOREMAN_SCOPE`; [`Config::resolve`]
/// is what enforces the fatal requirement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub scope: Option<String>,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub queue_limits: QueueLimits,
    #[serde(default)]
    pub hooks: HookConfig,
    #[serde(default)]
    pub task_types: HashMap<String, TaskTypeConfig>,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub file_operations: FileOperationsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub agents: Vec<AgentBlueprint>,
}

fn default_base_branch() -> String {
    "main".to_owned()
}

/// Fully resolved configuration: same shape as [`ConfigFile`] but with
/// `scope` guaranteed present.
#[derive(Debug, Clone)]
pub struct Config {
    pub scope: String,
    pub base_branch: String,
    pub queue_limits: QueueLimits,
    pub hooks: HookConfig,
    pub task_types: HashMap<String, TaskTypeConfig>,
    pub commands: CommandsConfig,
    pub file_operations: FileOperationsConfig,
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub agents: Vec<AgentBlueprint>,
}

/// Return the foreman config directory: `$XDG_CONFIG_HOME/foreman` or
/// `~/.config/foreman`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("foreman");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("foreman")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

impl Config {
    /// Resolve configuration: `cli_scope` > `FOREMAN_SCOPE` env > the file
    /// at `path`'s `scope` key. Every other field falls back the same way
    /// within the file (or its own default if the file is absent/unreadable).
    pub fn resolve(path: &Path, cli_scope: Option<&str>) -> Result<Self, ConfigError> {
        let file = load_config_file(path).unwrap_or_default();

        let scope = cli_scope
            .map(str::to_owned)
            .or_else(|| std::env::var("FOREMAN_SCOPE").ok())
            .or(file.scope.clone())
            .ok_or(ConfigError::MissingScope)?;

        Ok(Self {
            scope,
            base_branch: file.base_branch,
            queue_limits: file.queue_limits,
            hooks: file.hooks,
            task_types: file.task_types,
            commands: file.commands,
            file_operations: file.file_operations,
            server: file.server,
            jobs: file.jobs,
            agents: file.agents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_yaml(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn resolve_requires_scope_somewhere() {
        let dir = TempDir::new().unwrap();
        let path = write_yaml(&dir, "base_branch: main\n");
        let result = Config::resolve(&path, None);
        assert!(matches!(result, Err(ConfigError::MissingScope)));
    }

    #[test]
    fn cli_scope_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_yaml(&dir, "scope: from-file\n");
        let config = Config::resolve(&path, Some("from-cli")).unwrap();
        assert_eq!(config.scope, "from-cli");
    }

    #[test]
    fn file_scope_used_when_no_override() {
        let dir = TempDir::new().unwrap();
        let path = write_yaml(&dir, "scope: team-a\nbase_branch: develop\n");
        let config = Config::resolve(&path, None).unwrap();
        assert_eq!(config.scope, "team-a");
        assert_eq!(config.base_branch, "develop");
    }

    #[test]
    fn defaults_apply_when_keys_absent() {
        let dir = TempDir::new().unwrap();
        let path = write_yaml(&dir, "scope: team-a\n");
        let config = Config::resolve(&path, None).unwrap();
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.queue_limits.max_claimed, 5);
        assert_eq!(config.server.tick_interval_secs, 60);
    }

    #[test]
    fn full_config_parses() {
        let dir = TempDir::new().unwrap();
        let path = write_yaml(
            &dir,
            r#"
scope: team-a
base_branch: main
queue_limits:
  max_claimed: 10
  max_provisional: 4
hooks:
  before_submit: [rebase_on_main, run_tests]
  before_merge: [create_pr, merge_pr]
task_types:
  bugfix:
    merge_method: squash
commands:
  test: "cargo test"
agents:
  - name: builder-1
    role: builder
    executable: ./bin/agent
"#,
        );
        let config = Config::resolve(&path, None).unwrap();
        assert_eq!(config.queue_limits.max_claimed, 10);
        assert_eq!(config.hooks.before_submit, vec!["rebase_on_main", "run_tests"]);
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].role, "builder");
    }
}
