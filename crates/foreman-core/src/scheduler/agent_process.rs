//! Child-process side of the Scheduler (spec §4.6 step 3d/4): launching an
//! agent blueprint's runtime and watching it for liveness. The agent
//! runtime's own wire protocol is out of scope here — the scheduler only
//! needs an exit code and a heartbeat file it can stat.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};

use crate::config::AgentBlueprint;

/// A spawned agent instance the scheduler is tracking this run.
pub struct AgentHandle {
    pub blueprint_name: String,
    pub task_id: Option<String>,
    pub port: u16,
    child: Child,
}

/// Outcome of polling a tracked handle for step 4 of the tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// Still running.
    Running,
    /// Exited with this code (`None` if killed by a signal).
    Exited(Option<i32>),
}

impl AgentHandle {
    /// Non-blocking exit check.
    pub fn poll(&mut self) -> std::io::Result<PollResult> {
        match self.child.try_wait()? {
            Some(status) => Ok(PollResult::Exited(status.code())),
            None => Ok(PollResult::Running),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send SIGTERM (spec §5's SIGINT-propagation rule). The claim this
    /// agent holds is left alone; it is reclaimed through the normal
    /// lease-expiry path if the agent doesn't exit in time on its own.
    #[cfg(unix)]
    pub fn terminate(&self) -> std::io::Result<()> {
        let Some(pid) = self.pid() else { return Ok(()) };
        if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    pub fn terminate(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Launch one instance of `blueprint` against `worktree_path`. `task_id` is
/// `None` until the blueprint's own claim loop picks something up; the
/// scheduler just hands the agent its assignment context, not a task.
pub fn spawn(
    blueprint: &AgentBlueprint,
    worktree_path: &Path,
    orchestrator_id: &str,
    task_id: Option<&str>,
    port: u16,
    state_dir: &Path,
    config_path: &Path,
) -> std::io::Result<AgentHandle> {
    let child = Command::new(&blueprint.executable)
        .args(&blueprint.args)
        .current_dir(worktree_path)
        .env("FOREMAN_AGENT_NAME", &blueprint.name)
        .env("FOREMAN_AGENT_ROLE", &blueprint.role)
        .env("FOREMAN_WORKTREE_PATH", worktree_path)
        .env("FOREMAN_ORCHESTRATOR_ID", orchestrator_id)
        .env("FOREMAN_TASK_ID", task_id.unwrap_or(""))
        .env("FOREMAN_PORT", port.to_string())
        .env("FOREMAN_STATE_DIR", state_dir)
        .env("FOREMAN_CONFIG_PATH", config_path)
        .env("FOREMAN_HEARTBEAT_PATH", heartbeat_path(state_dir, &blueprint.name))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false)
        .spawn()?;

    Ok(AgentHandle {
        blueprint_name: blueprint.name.clone(),
        task_id: task_id.map(str::to_owned),
        port,
        child,
    })
}

/// Where an agent's heartbeat file lives: `<state_dir>/heartbeats/<name>`.
pub fn heartbeat_path(state_dir: &Path, agent_name: &str) -> PathBuf {
    state_dir.join("heartbeats").join(agent_name)
}

/// Last time `agent_name` touched its heartbeat file, if it exists.
pub fn read_heartbeat(state_dir: &Path, agent_name: &str) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(heartbeat_path(state_dir, agent_name)).ok()?;
    let modified = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks permission/existence without sending a signal.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Whether a claimed task's agent process counts as a zombie (spec §4.6's
/// "Lease liveness" rule): the PID is gone and the heartbeat is stale (or
/// was never written). Pure given the inputs, so it's testable without a
/// real process or filesystem.
pub fn is_zombie_claim(pid_alive: bool, last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>, grace_secs: i64) -> bool {
    if pid_alive {
        return false;
    }
    match last_heartbeat {
        Some(hb) => now - hb > chrono::Duration::seconds(grace_secs),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_process_is_never_a_zombie() {
        assert!(!is_zombie_claim(true, None, Utc::now(), 0));
    }

    #[test]
    fn dead_process_with_no_heartbeat_is_a_zombie() {
        assert!(is_zombie_claim(false, None, Utc::now(), 300));
    }

    #[test]
    fn dead_process_within_grace_is_not_yet_a_zombie() {
        let hb = Utc::now() - chrono::Duration::seconds(10);
        assert!(!is_zombie_claim(false, Some(hb), Utc::now(), 300));
    }

    #[test]
    fn dead_process_past_grace_is_a_zombie() {
        let hb = Utc::now() - chrono::Duration::seconds(400);
        assert!(is_zombie_claim(false, Some(hb), Utc::now(), 300));
    }
}
