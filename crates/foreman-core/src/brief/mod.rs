//! Task brief file format (spec §6): `shared/tasks/TASK-<id>.md`.
//!
//! The brief is human-authored and opaque to the core beyond its header
//! block — the body (`## Context`, `## Acceptance Criteria`, and anything
//! else) is read once at creation and forwarded to the agent verbatim. This
//! module only extracts the header fields needed to create the task row;
//! it never rewrites the file (rejection feedback goes to the thread log
//! instead, spec §4.9).

use std::collections::HashMap;

/// Recognized header keys (spec §6). Anything else in the header block is
/// ignored, not an error — briefs may carry operator-only annotations.
const RECOGNIZED_KEYS: &[&str] = &[
    "ROLE",
    "PRIORITY",
    "BRANCH",
    "CREATED",
    "CREATED_BY",
    "BLOCKED_BY",
    "PROJECT",
    "CHECKS",
    "BREAKDOWN_DEPTH",
    "SKIP_PR",
    "EXPEDITE",
    "WIP_BRANCH",
    "LAST_AGENT",
    "CONTINUATION_REASON",
];

#[derive(Debug, Clone)]
pub struct TaskBrief {
    /// The `<id>` from the `# [TASK-<id>] <title>` line, if the file carries
    /// one. Callers creating a fresh task generate their own id and ignore
    /// this; it is mainly useful when re-reading an existing brief.
    pub id: Option<String>,
    pub title: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BriefError {
    #[error("brief has no `# [TASK-...] <title>` heading")]
    MissingTitle,
}

impl TaskBrief {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn role(&self) -> Option<&str> {
        self.header("ROLE")
    }

    pub fn priority(&self) -> &str {
        self.header("PRIORITY").unwrap_or("P2")
    }

    pub fn branch(&self) -> &str {
        self.header("BRANCH").unwrap_or("main")
    }

    /// Comma-separated `CHECKS` header, split and trimmed.
    pub fn checks(&self) -> Vec<String> {
        self.header("CHECKS")
            .map(|s| s.split(',').map(|c| c.trim().to_owned()).filter(|c| !c.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn blocked_by(&self) -> Option<&str> {
        self.header("BLOCKED_BY")
    }

    pub fn breakdown_depth(&self) -> i32 {
        self.header("BREAKDOWN_DEPTH").and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    pub fn expedite(&self) -> bool {
        self.header("EXPEDITE").map(|s| s.eq_ignore_ascii_case("true")).unwrap_or(false)
    }
}

/// Parse a task brief's header block and body. The title line is required;
/// every other field is optional and falls back to spec-named defaults when
/// read through [`TaskBrief`]'s accessors.
pub fn parse_task_brief(content: &str) -> Result<TaskBrief, BriefError> {
    let mut lines = content.lines();

    let title_line = lines.find(|l| l.trim_start().starts_with('#')).ok_or(BriefError::MissingTitle)?;
    let (id, title) = parse_title_line(title_line);

    let mut headers = HashMap::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if RECOGNIZED_KEYS.contains(&key) {
            headers.insert(key.to_owned(), value.trim().to_owned());
        }
    }

    Ok(TaskBrief {
        id,
        title,
        headers,
        body: content.to_owned(),
    })
}

fn parse_title_line(line: &str) -> (Option<String>, String) {
    let trimmed = line.trim_start_matches('#').trim();
    let Some(rest) = trimmed.strip_prefix("[TASK-") else {
        return (None, trimmed.to_owned());
    };
    let Some((id, after)) = rest.split_once(']') else {
        return (None, trimmed.to_owned());
    };
    (Some(id.trim().to_owned()), after.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# [TASK-abc123] Fix the frobnicator\n\nROLE: builder\nPRIORITY: P1\nBRANCH: main\nCREATED: 2026-02-11T10:00:00Z\nCREATED_BY: alice\nBLOCKED_BY: None\nCHECKS: lint, test\nEXPEDITE: true\n\n## Context\n\nThe frobnicator is broken.\n\n## Acceptance Criteria\n\n- [ ] It frobnicates again\n";

    #[test]
    fn parses_title_and_id() {
        let brief = parse_task_brief(SAMPLE).unwrap();
        assert_eq!(brief.id.as_deref(), Some("abc123"));
        assert_eq!(brief.title, "Fix the frobnicator");
    }

    #[test]
    fn parses_recognized_headers() {
        let brief = parse_task_brief(SAMPLE).unwrap();
        assert_eq!(brief.role(), Some("builder"));
        assert_eq!(brief.priority(), "P1");
        assert_eq!(brief.checks(), vec!["lint".to_owned(), "test".to_owned()]);
        assert!(brief.expedite());
    }

    #[test]
    fn blocked_by_none_literal_is_not_normalized_here() {
        // Normalization to `null` happens at the storage boundary
        // (`Task::normalize_blocked_by`), not during brief parsing.
        let brief = parse_task_brief(SAMPLE).unwrap();
        assert_eq!(brief.blocked_by(), Some("None"));
    }

    #[test]
    fn missing_title_is_an_error() {
        let result = parse_task_brief("no heading here\nROLE: builder\n");
        assert!(matches!(result, Err(BriefError::MissingTitle)));
    }

    #[test]
    fn body_is_preserved_verbatim() {
        let brief = parse_task_brief(SAMPLE).unwrap();
        assert!(brief.body.contains("## Acceptance Criteria"));
        assert!(brief.body.contains("frobnicates again"));
    }
}
