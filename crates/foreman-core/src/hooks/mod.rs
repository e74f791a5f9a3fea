//! Hook Engine (spec §4.5): declarative lifecycle callbacks at two points
//! (`before_submit`, `before_merge`), two types (`agent`, `orchestrator`).
//!
//! Hooks are a sealed variant, not a string-keyed registry: adding a new
//! hook means adding a constructor and a `run` arm, not registering a
//! callable somewhere at runtime.

pub mod builtin;

use std::collections::HashMap;
use std::path::PathBuf;

use foreman_db::models::{HookPoint, HookType};

/// Everything a hook needs to execute, independent of how it was resolved.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub task_id: String,
    pub task_title: String,
    pub branch_name: String,
    pub base_branch: String,
    pub worktree_path: PathBuf,
    pub agent_name: String,
    pub commits_count: i32,
    pub merge_method: String,
    pub pr_number: Option<i32>,
    pub extra: HashMap<String, String>,
}

/// The execution-contract outcome of one hook run (spec §4.5's three-way
/// result, distinct from the persisted [`foreman_db::models::HookStatus`]
/// which only has `pending`/`passed`/`failed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Success,
    Failure,
    Skip,
}

/// The full result of running one hook.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub outcome: HookOutcome,
    pub message: String,
    pub context: serde_json::Value,
    /// Populated on failure: a prompt the agent runner may re-feed to the
    /// LLM on the next turn.
    pub remediation_prompt: Option<String>,
}

impl HookResult {
    fn success(message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            outcome: HookOutcome::Success,
            message: message.into(),
            context,
            remediation_prompt: None,
        }
    }

    fn skip(message: impl Into<String>) -> Self {
        Self {
            outcome: HookOutcome::Skip,
            message: message.into(),
            context: serde_json::json!({}),
            remediation_prompt: None,
        }
    }

    fn failure(message: impl Into<String>, remediation_prompt: impl Into<String>) -> Self {
        Self {
            outcome: HookOutcome::Failure,
            message: message.into(),
            context: serde_json::json!({}),
            remediation_prompt: Some(remediation_prompt.into()),
        }
    }
}

/// The four known built-in hooks (spec §4.5). `merge_pr` is always
/// orchestrator-typed; the others default to agent-typed but a config
/// override is honored at resolution time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinHook {
    RebaseOnMain,
    RunTests,
    CreatePr,
    MergePr,
}

impl BuiltinHook {
    pub fn name(self) -> &'static str {
        match self {
            Self::RebaseOnMain => "rebase_on_main",
            Self::RunTests => "run_tests",
            Self::CreatePr => "create_pr",
            Self::MergePr => "merge_pr",
        }
    }

    /// Resolve a config-facing hook name to a known built-in, or `None` if
    /// it doesn't match one (callers should warn and skip, per spec §4.5).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rebase_on_main" => Some(Self::RebaseOnMain),
            "run_tests" => Some(Self::RunTests),
            "create_pr" => Some(Self::CreatePr),
            "merge_pr" => Some(Self::MergePr),
            _ => None,
        }
    }

    /// The hook's default type, before any config override.
    pub fn default_type(self) -> HookType {
        match self {
            Self::MergePr => HookType::Orchestrator,
            _ => HookType::Agent,
        }
    }

    pub async fn run(self, ctx: &HookContext) -> HookResult {
        match self {
            Self::RebaseOnMain => builtin::rebase_on_main(ctx).await,
            Self::RunTests => builtin::run_tests(ctx).await,
            Self::CreatePr => builtin::create_pr(ctx).await,
            Self::MergePr => builtin::merge_pr(ctx).await,
        }
    }
}

/// Resolve the hook list for a newly created task (spec §4.5 resolution
/// order): per-type config override, else project-level config, else the
/// built-in default. Pure: same inputs always produce the same list
/// (testable property in spec §8).
pub fn resolve_hooks(
    task_type: Option<&str>,
    task_type_hooks: Option<&crate::config::HookConfig>,
    project_hooks: &crate::config::HookConfig,
) -> Vec<(String, HookPoint, HookType)> {
    let source = match (task_type, task_type_hooks) {
        (Some(_), Some(overridden)) => overridden,
        _ => project_hooks,
    };

    let has_any = !source.before_submit.is_empty() || !source.before_merge.is_empty();

    let (before_submit, before_merge): (Vec<String>, Vec<String>) = if has_any {
        (source.before_submit.clone(), source.before_merge.clone())
    } else {
        (vec!["create_pr".to_owned()], vec!["merge_pr".to_owned()])
    };

    let mut resolved = Vec::new();
    for name in before_submit {
        push_resolved(&mut resolved, &name, HookPoint::BeforeSubmit);
    }
    for name in before_merge {
        push_resolved(&mut resolved, &name, HookPoint::BeforeMerge);
    }
    resolved
}

fn push_resolved(resolved: &mut Vec<(String, HookPoint, HookType)>, name: &str, point: HookPoint) {
    match BuiltinHook::from_name(name) {
        Some(hook) => resolved.push((name.to_owned(), point, hook.default_type())),
        None => tracing::warn!(hook = name, "unknown hook name, skipping"),
    }
}

/// Run a list of resolved hooks against a context, fail-fast: the first
/// `Failure` short-circuits the remaining hooks.
pub async fn run_hooks(hooks: &[BuiltinHook], ctx: &HookContext) -> Vec<(BuiltinHook, HookResult)> {
    let mut results = Vec::new();
    for hook in hooks {
        let result = hook.run(ctx).await;
        let stop = result.outcome == HookOutcome::Failure;
        results.push((*hook, result));
        if stop {
            break;
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;

    #[test]
    fn resolve_hooks_falls_back_to_builtin_default() {
        let project = HookConfig::default();
        let resolved = resolve_hooks(None, None, &project);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].0, "create_pr");
        assert_eq!(resolved[0].1, HookPoint::BeforeSubmit);
        assert_eq!(resolved[1].0, "merge_pr");
        assert_eq!(resolved[1].1, HookPoint::BeforeMerge);
    }

    #[test]
    fn resolve_hooks_prefers_project_config_over_default() {
        let project = HookConfig {
            before_submit: vec!["rebase_on_main".into(), "run_tests".into()],
            before_merge: vec!["merge_pr".into()],
        };
        let resolved = resolve_hooks(None, None, &project);
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].0, "rebase_on_main");
        assert_eq!(resolved[1].0, "run_tests");
    }

    #[test]
    fn resolve_hooks_prefers_task_type_override() {
        let project = HookConfig {
            before_submit: vec!["create_pr".into()],
            before_merge: vec!["merge_pr".into()],
        };
        let override_hooks = HookConfig {
            before_submit: vec!["run_tests".into()],
            before_merge: vec![],
        };
        let resolved = resolve_hooks(Some("bugfix"), Some(&override_hooks), &project);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "run_tests");
    }

    #[test]
    fn unknown_hook_name_is_skipped() {
        let project = HookConfig {
            before_submit: vec!["nonexistent_hook".into(), "create_pr".into()],
            before_merge: vec![],
        };
        let resolved = resolve_hooks(None, None, &project);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "create_pr");
    }

    #[test]
    fn resolution_is_pure() {
        let project = HookConfig {
            before_submit: vec!["create_pr".into()],
            before_merge: vec!["merge_pr".into()],
        };
        let a = resolve_hooks(None, None, &project);
        let b = resolve_hooks(None, None, &project);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.0, y.0);
        }
    }

    #[test]
    fn merge_pr_is_always_orchestrator_typed() {
        assert_eq!(BuiltinHook::MergePr.default_type(), HookType::Orchestrator);
        assert_eq!(BuiltinHook::CreatePr.default_type(), HookType::Agent);
    }
}
