//! Per-task append-only event log (Task Log, spec §4.2).
//!
//! Every task gets its own file at `<state_dir>/logs/tasks/TASK-<id>.log`
//! that survives the task's completion. Lines look like:
//!
//! ```text
//! [2026-02-11T10:07:46] CREATED by=human priority=P2 role=builder
//! [2026-02-11T10:16:17] CLAIMED by=orch-1 attempt=1
//! [2026-02-11T10:28:52] SUBMITTED commits=1 turns=125
//! ```
//!
//! Writes are open-append-close so no long-lived file handle needs to be
//! tracked per task, and concurrent writers from different processes append
//! safely (POSIX `O_APPEND`).

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskLogError {
    #[error("failed to create task log directory {0}")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("failed to write task log {0}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("failed to read task log {0}")]
    Read(PathBuf, #[source] std::io::Error),
}

/// One key=value field of a log entry. Values containing a space or `=`
/// are quoted; a `None` value is omitted entirely.
#[derive(Debug, Clone)]
pub struct Field<'a>(pub &'a str, pub Option<String>);

/// Writes and reads task log files under `<state_dir>/logs/tasks/`.
#[derive(Debug, Clone)]
pub struct TaskLog {
    state_dir: PathBuf,
}

impl TaskLog {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs").join("tasks")
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.logs_dir().join(format!("TASK-{task_id}.log"))
    }

    /// Append one event line, e.g. `append("t1", "CLAIMED", &[Field("by",
    /// Some("orch-1".into())), Field("attempt", Some("1".into()))])`.
    pub fn append(&self, task_id: &str, event: &str, fields: &[Field<'_>]) -> Result<(), TaskLogError> {
        let dir = self.logs_dir();
        std::fs::create_dir_all(&dir).map_err(|e| TaskLogError::CreateDir(dir.clone(), e))?;

        let path = self.log_path(task_id);
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S");

        let mut sorted: Vec<&Field<'_>> = fields.iter().collect();
        sorted.sort_by_key(|f| f.0);

        let mut line = format!("[{timestamp}] {event}");
        for field in sorted {
            let Some(value) = &field.1 else { continue };
            if value.contains(' ') || value.contains('=') {
                line.push_str(&format!(" {}=\"{}\"", field.0, value));
            } else {
                line.push_str(&format!(" {}={}", field.0, value));
            }
        }
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TaskLogError::Write(path.clone(), e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TaskLogError::Write(path.clone(), e))?;

        Ok(())
    }

    pub fn log_created(&self, task_id: &str, created_by: &str, priority: &str, role: &str) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "CREATED",
            &[
                Field("by", Some(created_by.into())),
                Field("priority", Some(priority.into())),
                Field("role", Some(role.into())),
            ],
        )
    }

    pub fn log_claimed(&self, task_id: &str, orchestrator_id: &str, attempt: i32) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "CLAIMED",
            &[
                Field("by", Some(orchestrator_id.into())),
                Field("attempt", Some(attempt.to_string())),
            ],
        )
    }

    pub fn log_submitted(&self, task_id: &str, commits: i32, turns: i32) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "SUBMITTED",
            &[
                Field("commits", Some(commits.to_string())),
                Field("turns", Some(turns.to_string())),
            ],
        )
    }

    pub fn log_rejected(&self, task_id: &str, reason: &str, rejected_by: &str) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "REJECTED",
            &[
                Field("reason", Some(reason.into())),
                Field("rejected_by", Some(rejected_by.into())),
            ],
        )
    }

    pub fn log_accepted(&self, task_id: &str, pr_number: Option<i32>) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "ACCEPTED",
            &[Field("pr", pr_number.map(|n| n.to_string()))],
        )
    }

    pub fn log_failed(&self, task_id: &str, reason: &str) -> Result<(), TaskLogError> {
        self.append(task_id, "FAILED", &[Field("reason", Some(reason.into()))])
    }

    /// `REQUEUED`: a task moved from one queue to another outside its
    /// normal forward transition (zombie reclaim, rejection escalation).
    pub fn log_requeued(&self, task_id: &str, from_queue: &str, to_queue: &str) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "REQUEUED",
            &[
                Field("from_queue", Some(from_queue.into())),
                Field("to_queue", Some(to_queue.into())),
            ],
        )
    }

    pub fn log_escalated(&self, task_id: &str, reason: &str, escalated_by: &str) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "ESCALATED",
            &[
                Field("reason", Some(reason.into())),
                Field("escalated_by", Some(escalated_by.into())),
            ],
        )
    }

    pub fn log_recycled(&self, task_id: &str, recycled_by: &str, reason: Option<&str>) -> Result<(), TaskLogError> {
        self.append(
            task_id,
            "RECYCLED",
            &[
                Field("recycled_by", Some(recycled_by.into())),
                Field("reason", reason.map(str::to_owned)),
            ],
        )
    }

    /// All lines in a task's log, raw. Empty if the task has never logged
    /// anything.
    pub fn get_events(&self, task_id: &str) -> Result<Vec<String>, TaskLogError> {
        let path = self.log_path(task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| TaskLogError::Read(path.clone(), e))?;
        Ok(contents.lines().map(str::to_owned).collect())
    }

    /// How many `CLAIMED` entries a task has accumulated.
    pub fn get_claim_count(&self, task_id: &str) -> Result<u32, TaskLogError> {
        let count = self
            .get_events(task_id)?
            .iter()
            .filter(|line| line.contains(" CLAIMED "))
            .count();
        Ok(count as u32)
    }

    /// First and last `CLAIMED` timestamps, if any.
    pub fn get_claim_times(&self, task_id: &str) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), TaskLogError> {
        let mut first = None;
        let mut last = None;

        for line in self.get_events(task_id)? {
            if !line.contains(" CLAIMED ") {
                continue;
            }
            let Some(ts) = parse_leading_timestamp(&line) else {
                continue;
            };
            if first.is_none() {
                first = Some(ts);
            }
            last = Some(ts);
        }

        Ok((first, last))
    }
}

fn parse_leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let rest = line.strip_prefix('[')?;
    let (ts, _) = rest.split_once(']')?;
    let naive = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_then_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());

        log.log_created("t1", "human", "P2", "builder").unwrap();
        log.log_claimed("t1", "orch-1", 1).unwrap();

        let events = log.get_events("t1").unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("CREATED"));
        assert!(events[1].contains("CLAIMED"));
    }

    #[test]
    fn missing_log_returns_empty() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());
        assert_eq!(log.get_events("nope").unwrap(), Vec::<String>::new());
        assert_eq!(log.get_claim_count("nope").unwrap(), 0);
    }

    #[test]
    fn claim_count_tracks_multiple_attempts() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());

        log.log_claimed("t1", "orch-1", 1).unwrap();
        log.log_rejected("t1", "merge conflicts", "pre-check").unwrap();
        log.log_claimed("t1", "orch-1", 2).unwrap();

        assert_eq!(log.get_claim_count("t1").unwrap(), 2);
    }

    #[test]
    fn claim_times_first_and_last() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());

        log.log_claimed("t1", "orch-1", 1).unwrap();
        log.log_claimed("t1", "orch-1", 2).unwrap();

        let (first, last) = log.get_claim_times("t1").unwrap();
        assert!(first.is_some());
        assert!(last.is_some());
        assert!(first.unwrap() <= last.unwrap());
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());
        log.log_rejected("t1", "merge conflicts in src/lib.rs", "reviewer").unwrap();

        let events = log.get_events("t1").unwrap();
        assert!(events[0].contains("reason=\"merge conflicts in src/lib.rs\""));
    }

    #[test]
    fn rejection_with_escalation_logs_requeued() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());
        log.log_rejected("t1", "missing test", "gatekeeper").unwrap();
        log.log_requeued("t1", "provisional", "escalated").unwrap();

        let events = log.get_events("t1").unwrap();
        assert!(events[0].contains("REJECTED"));
        assert!(events[1].contains("from_queue=provisional"));
        assert!(events[1].contains("to_queue=escalated"));
    }
}
