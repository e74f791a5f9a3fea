//! The four known built-in hooks (spec §4.5). Each is a plain async
//! function, not a trait impl: there is no registry to populate, only the
//! sealed [`super::BuiltinHook::run`] dispatch.

use std::process::Command;

use super::{HookContext, HookResult};

const REMEDIATION_TAIL_BYTES: usize = 3000;

/// `rebase_on_main`: fetch `origin/<base>`; SKIP if already current;
/// otherwise rebase, aborting and reporting conflicts on failure.
///
/// Grounded on the rebaser role's `_attempt_rebase`: rebase, on failure
/// list conflicted files via `git diff --name-only --diff-filter=U`, then
/// `git rebase --abort` so the worktree is left clean either way.
pub async fn rebase_on_main(ctx: &HookContext) -> HookResult {
    let worktree = ctx.worktree_path.clone();
    let base = ctx.base_branch.clone();

    tokio::task::spawn_blocking(move || rebase_on_main_sync(&worktree, &base))
        .await
        .unwrap_or_else(|e| HookResult::failure(format!("rebase task panicked: {e}"), "Internal error running rebase_on_main."))
}

fn rebase_on_main_sync(worktree: &std::path::Path, base: &str) -> HookResult {
    let fetch = run_git(worktree, &["fetch", "origin", base]);
    if let Err(e) = fetch {
        return HookResult::failure(format!("git fetch failed: {e}"), "Could not fetch the base branch.");
    }

    let rev_list = Command::new("git")
        .args(["rev-list", &format!("HEAD..origin/{base}")])
        .current_dir(worktree)
        .output();

    match rev_list {
        Ok(output) if output.status.success() && String::from_utf8_lossy(&output.stdout).trim().is_empty() => {
            return HookResult::skip(format!("already up to date with origin/{base}"));
        }
        _ => {}
    }

    let rebase = Command::new("git")
        .args(["rebase", &format!("origin/{base}")])
        .current_dir(worktree)
        .output();

    let output = match rebase {
        Ok(output) => output,
        Err(e) => return HookResult::failure(format!("git rebase failed to run: {e}"), "Could not run git rebase."),
    };

    if output.status.success() {
        return HookResult::success("rebased onto origin/".to_owned() + base, serde_json::json!({}));
    }

    let conflicted = Command::new("git")
        .args(["diff", "--name-only", "--diff-filter=U"])
        .current_dir(worktree)
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_owned())
        .unwrap_or_default();

    let _ = Command::new("git").args(["rebase", "--abort"]).current_dir(worktree).output();

    let remediation = format!(
        "## Rebase Conflict\n\nRebasing onto `origin/{base}` produced conflicts.\n\nConflicted files:\n{conflicted}\n\nPlease resolve the conflicts and push an updated branch."
    );
    HookResult::failure("rebase conflict", remediation)
}

/// `run_tests`: auto-detect by marker file, in order pytest → npm → make;
/// SKIP if none match. On failure, remediation carries the last 3000 bytes
/// of combined output.
pub async fn run_tests(ctx: &HookContext) -> HookResult {
    let worktree = ctx.worktree_path.clone();
    tokio::task::spawn_blocking(move || run_tests_sync(&worktree))
        .await
        .unwrap_or_else(|e| HookResult::failure(format!("test task panicked: {e}"), "Internal error running tests."))
}

fn run_tests_sync(worktree: &std::path::Path) -> HookResult {
    let (program, args): (&str, &[&str]) = if worktree.join("pyproject.toml").exists() || worktree.join("pytest.ini").exists() {
        ("pytest", &[])
    } else if worktree.join("package.json").exists() {
        ("npm", &["test"])
    } else if worktree.join("Makefile").exists() {
        ("make", &["test"])
    } else {
        return HookResult::skip("no recognized test runner marker file found");
    };

    let output = Command::new(program).args(args).current_dir(worktree).output();
    let output = match output {
        Ok(output) => output,
        Err(e) => return HookResult::failure(format!("failed to run {program}: {e}"), "Could not run the test suite."),
    };

    if output.status.success() {
        return HookResult::success(format!("{program} passed"), serde_json::json!({}));
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push('\n');
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let tail = tail_bytes(&combined, REMEDIATION_TAIL_BYTES);

    HookResult::failure(
        format!("{program} failed"),
        format!("## Test Failure\n\n```\n{tail}\n```\n\nPlease fix the failing tests."),
    )
}

/// `create_pr`: push the branch, open a PR via the host API, and record
/// the URL into the hook's context for evidence.
pub async fn create_pr(ctx: &HookContext) -> HookResult {
    if let Err(e) = push_branch(&ctx.worktree_path, &ctx.branch_name) {
        return HookResult::failure(format!("push failed: {e}"), "Could not push the branch for PR creation.");
    }

    let Some((owner, repo)) = repo_slug_from_env() else {
        return HookResult::failure(
            "FOREMAN_GITHUB_REPO not set",
            "Host API is not configured; cannot create a pull request.",
        );
    };

    let client = match build_octocrab() {
        Ok(client) => client,
        Err(e) => return HookResult::failure(format!("GitHub client error: {e}"), "Host API authentication failed."),
    };

    let pr = client
        .pulls(&owner, &repo)
        .create(&ctx.task_title, &ctx.branch_name, &ctx.base_branch)
        .body(format!("Automated PR for task {}.", ctx.task_id))
        .send()
        .await;

    match pr {
        Ok(pr) => HookResult::success(
            format!("created PR #{}", pr.number),
            serde_json::json!({"pr_number": pr.number, "pr_url": pr.html_url.map(|u| u.to_string())}),
        ),
        Err(e) => HookResult::failure(format!("PR creation failed: {e}"), "Could not create the pull request via the host API."),
    }
}

/// `merge_pr`: SKIP-with-pass if the task has no PR yet; otherwise merge
/// via the host API using the task's configured merge method.
pub async fn merge_pr(ctx: &HookContext) -> HookResult {
    let Some(pr_number) = ctx.pr_number else {
        return HookResult::skip("task has no open PR");
    };

    let Some((owner, repo)) = repo_slug_from_env() else {
        return HookResult::failure(
            "FOREMAN_GITHUB_REPO not set",
            "Host API is not configured; cannot merge the pull request.",
        );
    };

    let client = match build_octocrab() {
        Ok(client) => client,
        Err(e) => return HookResult::failure(format!("GitHub client error: {e}"), "Host API authentication failed."),
    };

    let route = format!("/repos/{owner}/{repo}/pulls/{pr_number}/merge");
    let body = serde_json::json!({"merge_method": ctx.merge_method});

    match client.put::<serde_json::Value, _, _>(route, Some(&body)).await {
        Ok(_) => HookResult::success(format!("merged PR #{pr_number}"), serde_json::json!({"pr_number": pr_number})),
        Err(e) => HookResult::failure(format!("merge failed: {e}"), "Could not merge the pull request via the host API."),
    }
}

fn run_git(worktree: &std::path::Path, args: &[&str]) -> Result<(), String> {
    let output = Command::new("git").args(args).current_dir(worktree).output().map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

fn push_branch(worktree: &std::path::Path, branch: &str) -> Result<(), String> {
    run_git(worktree, &["push", "origin", branch])
}

pub(crate) fn repo_slug_from_env() -> Option<(String, String)> {
    let slug = std::env::var("FOREMAN_GITHUB_REPO").ok()?;
    let (owner, repo) = slug.split_once('/')?;
    Some((owner.to_owned(), repo.to_owned()))
}

pub(crate) fn build_octocrab() -> Result<octocrab::Octocrab, octocrab::Error> {
    let token = std::env::var("FOREMAN_GITHUB_TOKEN").unwrap_or_default();
    octocrab::Octocrab::builder().personal_token(token).build()
}

fn tail_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_bytes_short_string_unchanged() {
        assert_eq!(tail_bytes("hello", 10), "hello");
    }

    #[test]
    fn tail_bytes_truncates_from_the_front() {
        assert_eq!(tail_bytes("abcdefghij", 4), "ghij");
    }

    #[test]
    fn repo_slug_parses_owner_and_repo() {
        unsafe {
            std::env::set_var("FOREMAN_GITHUB_REPO", "acme/widgets");
        }
        assert_eq!(repo_slug_from_env(), Some(("acme".to_owned(), "widgets".to_owned())));
        unsafe {
            std::env::remove_var("FOREMAN_GITHUB_REPO");
        }
    }
}
