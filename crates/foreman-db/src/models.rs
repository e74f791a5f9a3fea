use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A task's current lifecycle state. See the task lifecycle in the data
/// model: `incoming -> claimed -> provisional -> {done, failed}`, with
/// `rejected`/`escalated`/`recycled`/`breakdown`/`needs_continuation`/
/// `blocked`/`cancelled` as the remaining reachable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Incoming,
    Claimed,
    Provisional,
    Done,
    Failed,
    Rejected,
    Escalated,
    Recycled,
    Breakdown,
    NeedsContinuation,
    Blocked,
    Cancelled,
}

impl Queue {
    /// Queues from which a task never transitions again.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Cancelled | Self::Escalated | Self::Rejected
        )
    }

    /// Queues that count as "accepted" for blocker resolution (invariant 4).
    pub const fn is_accepting(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Incoming => "incoming",
            Self::Claimed => "claimed",
            Self::Provisional => "provisional",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Recycled => "recycled",
            Self::Breakdown => "breakdown",
            Self::NeedsContinuation => "needs_continuation",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for Queue {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(Self::Incoming),
            "claimed" => Ok(Self::Claimed),
            "provisional" => Ok(Self::Provisional),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "escalated" => Ok(Self::Escalated),
            "recycled" => Ok(Self::Recycled),
            "breakdown" => Ok(Self::Breakdown),
            "needs_continuation" => Ok(Self::NeedsContinuation),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError::new("Queue", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Task priority. Ordered `P0 < P1 < P2 < P3` so that `Ord` derives the
/// exact tie-break rule list/claim ordering needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            other => Err(ParseEnumError::new("Priority", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// How an accepted task's branch is integrated into its base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        };
        f.write_str(s)
    }
}

impl FromStr for MergeMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "squash" => Ok(Self::Squash),
            "rebase" => Ok(Self::Rebase),
            other => Err(ParseEnumError::new("MergeMethod", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// A project's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Draft,
    Active,
    ReadyForPr,
    Complete,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::ReadyForPr => "ready-for-pr",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "ready-for-pr" => Ok(Self::ReadyForPr),
            "complete" => Ok(Self::Complete),
            other => Err(ParseEnumError::new("ProjectStatus", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// The lifecycle point at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    BeforeSubmit,
    BeforeMerge,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BeforeSubmit => "before_submit",
            Self::BeforeMerge => "before_merge",
        };
        f.write_str(s)
    }
}

impl FromStr for HookPoint {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before_submit" => Ok(Self::BeforeSubmit),
            "before_merge" => Ok(Self::BeforeMerge),
            other => Err(ParseEnumError::new("HookPoint", other)),
        }
    }
}

/// Who is responsible for executing a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    /// The agent process executes this hook and reports evidence.
    Agent,
    /// The scheduler executes this hook on the control-plane side.
    Orchestrator,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Orchestrator => "orchestrator",
        };
        f.write_str(s)
    }
}

/// Status of an individual hook attached to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Pending,
    Passed,
    Failed,
}

/// One declarative lifecycle hook attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub name: String,
    pub point: HookPoint,
    #[serde(rename = "type")]
    pub kind: HookType,
    pub status: HookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,
}

impl Hook {
    pub fn new(name: impl Into<String>, point: HookPoint, kind: HookType) -> Self {
        Self {
            name: name.into(),
            point,
            kind,
            status: HookStatus::Pending,
            evidence: None,
        }
    }
}

/// Thread message role: who is speaking and in what capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ThreadRole {
    Instruction,
    Rejection,
    Note,
    Escalation,
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Instruction => "instruction",
            Self::Rejection => "rejection",
            Self::Note => "note",
            Self::Escalation => "escalation",
        };
        f.write_str(s)
    }
}

impl FromStr for ThreadRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instruction" => Ok(Self::Instruction),
            "rejection" => Ok(Self::Rejection),
            "note" => Ok(Self::Note),
            "escalation" => Ok(Self::Escalation),
            other => Err(ParseEnumError::new("ThreadRole", other)),
        }
    }
}

/// Generic enum-parse error, shared across every `FromStr` impl above.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    pub type_name: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(type_name: &'static str, value: &str) -> Self {
        Self {
            type_name,
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.type_name, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// Optional grouping for related tasks. Tasks inherit a project's branch
/// when creating feature work.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub branch: String,
    pub base_branch: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

/// The central entity: a unit of work moving through the queue state
/// machine. Field list is exhaustive per the data model, including the
/// fields SPEC_FULL.md added beyond the literal attribute prose
/// (`expedite`, `needs_rebase`/`needs_rebase_at`, `last_agent`,
/// `continuation_reason`, `created_at`/`updated_at`, `created_by`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub role: String,
    pub priority: Priority,
    pub branch: String,
    pub queue: Queue,
    pub flow: String,
    #[sqlx(rename = "task_type")]
    pub type_: Option<String>,

    pub attempt_count: i32,
    pub rejection_count: i32,
    pub commits_count: i32,
    pub turns_used: i32,
    pub version: i64,

    pub claimed_by: Option<String>,
    pub orchestrator_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub blocked_by: Option<String>,
    pub project_id: Option<Uuid>,
    pub breakdown_id: Option<String>,
    pub breakdown_depth: i32,

    pub pr_number: Option<i32>,
    pub pr_url: Option<String>,
    pub merge_method: MergeMethod,

    /// Stored as JSONB; ordered list of `Hook`.
    #[sqlx(json)]
    pub hooks: sqlx::types::Json<Vec<Hook>>,
    /// Stored as JSONB; named checks that must all pass before acceptance.
    #[sqlx(json)]
    pub checks: sqlx::types::Json<Vec<String>>,

    pub file_path: String,

    pub expedite: bool,
    pub needs_rebase: bool,
    pub needs_rebase_at: Option<DateTime<Utc>>,
    pub last_agent: Option<String>,
    pub continuation_reason: Option<String>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Normalize a `blocked_by` value per the brief-file/creation rule:
    /// missing, empty string, and the literal string `"None"` all mean "no
    /// blockers" and must be stored as `None`.
    pub fn normalize_blocked_by(raw: Option<&str>) -> Option<String> {
        match raw {
            None => None,
            Some(s) if s.is_empty() || s == "None" => None,
            Some(s) => Some(s.to_owned()),
        }
    }

    /// The task's blocker IDs, split from the comma-separated column.
    pub fn blocker_ids(&self) -> Vec<&str> {
        self.blocked_by
            .as_deref()
            .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Append-only per-task message log entry (spec §3 "Thread Message").
/// Delivers rejection feedback without rewriting the task brief.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThreadMessage {
    pub id: i64,
    pub task_id: String,
    pub author: String,
    pub role: ThreadRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Human-visible inbox entry (spec §6 `shared/messages/`, distinct from the
/// per-task `shared/threads/`). Posted for events a human should see without
/// opening a specific task: escalations, depth-cap acceptances, and other
/// fatal lifecycle events (spec §7's "failures always manifest as either a
/// queue change OR an inbox message").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InboxMessage {
    pub id: i64,
    pub scope: String,
    pub task_id: Option<String>,
    pub reason: String,
    pub task_log_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Error taxonomy for the Task Store Client (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("version conflict on task {task_id}: expected {expected}, found {actual}")]
    Conflict {
        task_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("argument invalid: {0}")]
    InvalidArgument(String),

    #[error("transient store error")]
    Transient(#[source] sqlx::Error),

    #[error(transparent)]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the caller should retry with backoff (network/5xx-class
    /// failures) as opposed to re-reading and re-deciding (`Conflict`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_display_roundtrip() {
        let variants = [
            Queue::Incoming,
            Queue::Claimed,
            Queue::Provisional,
            Queue::Done,
            Queue::Failed,
            Queue::Rejected,
            Queue::Escalated,
            Queue::Recycled,
            Queue::Breakdown,
            Queue::NeedsContinuation,
            Queue::Blocked,
            Queue::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: Queue = s.parse().expect("should parse");
            assert_eq!(format!("{v:?}"), format!("{parsed:?}"));
        }
    }

    #[test]
    fn queue_invalid() {
        assert!("bogus".parse::<Queue>().is_err());
    }

    #[test]
    fn queue_terminal_and_accepting() {
        assert!(Queue::Done.is_terminal());
        assert!(Queue::Done.is_accepting());
        assert!(Queue::Cancelled.is_accepting());
        assert!(!Queue::Incoming.is_terminal());
        assert!(!Queue::Escalated.is_accepting());
        assert!(Queue::Escalated.is_terminal());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P1 < Priority::P2);
        assert!(Priority::P2 < Priority::P3);
    }

    #[test]
    fn priority_display_roundtrip() {
        for v in [Priority::P0, Priority::P1, Priority::P2, Priority::P3] {
            assert_eq!(v.to_string().parse::<Priority>().unwrap(), v);
        }
    }

    #[test]
    fn normalize_blocked_by_none_variants() {
        assert_eq!(Task::normalize_blocked_by(None), None);
        assert_eq!(Task::normalize_blocked_by(Some("")), None);
        assert_eq!(Task::normalize_blocked_by(Some("None")), None);
    }

    #[test]
    fn normalize_blocked_by_real_value() {
        assert_eq!(
            Task::normalize_blocked_by(Some("t1,t2")),
            Some("t1,t2".to_owned())
        );
    }

    #[test]
    fn project_status_display_roundtrip() {
        for v in [
            ProjectStatus::Draft,
            ProjectStatus::Active,
            ProjectStatus::ReadyForPr,
            ProjectStatus::Complete,
        ] {
            assert_eq!(v.to_string().parse::<ProjectStatus>().unwrap(), v);
        }
    }

    #[test]
    fn store_error_retryable() {
        let transient = StoreError::Transient(sqlx::Error::PoolClosed);
        assert!(transient.is_retryable());
        let conflict = StoreError::Conflict {
            task_id: "t1".into(),
            expected: 1,
            actual: 2,
        };
        assert!(!conflict.is_retryable());
    }
}
