//! Git worktree management for task isolation (Worktree Manager).
//!
//! Each claimed task runs in its own git worktree, providing filesystem
//! isolation without the overhead of full repository clones. Worktrees
//! share the object store of the main repository but have independent
//! working directories and index files.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors that can occur during worktree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// The main repository path does not exist or is not a git repository.
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    /// A git command failed to execute.
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The worktree path already exists but is associated with a different
    /// branch than expected.
    #[error(
        "worktree path exists but has unexpected branch: expected {expected}, found {found}"
    )]
    BranchMismatch { expected: String, found: String },

    /// Failed to parse porcelain output from `git worktree list`.
    #[error("failed to parse worktree list output: {0}")]
    ParseError(String),
}

/// Result of a merge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge completed successfully.
    Success,
    /// Merge had conflicts and was aborted.
    Conflict { details: String },
}

/// Information about a single git worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree directory.
    pub path: PathBuf,
    /// Branch checked out in this worktree, if any.
    pub branch: Option<String>,
    /// HEAD commit SHA.
    pub head_commit: String,
}

/// Manages git worktrees for task and agent isolation.
///
/// Git does not support concurrent worktree operations on the same
/// repository (it uses a lock file on the shared object store). This
/// manager serialises all mutating git operations through an internal
/// mutex so that concurrent lifecycle tasks do not race.
#[derive(Debug)]
pub struct WorktreeManager {
    /// Path to the main git repository.
    repo_path: PathBuf,
    /// Base directory under which worktrees are created.
    worktree_base: PathBuf,
    /// Serialises git operations to avoid lock-file contention.
    git_lock: Arc<Mutex<()>>,
}

impl Clone for WorktreeManager {
    fn clone(&self) -> Self {
        Self {
            repo_path: self.repo_path.clone(),
            worktree_base: self.worktree_base.clone(),
            git_lock: Arc::clone(&self.git_lock),
        }
    }
}

impl WorktreeManager {
    /// Create a new `WorktreeManager`.
    ///
    /// # Errors
    ///
    /// Returns [`WorktreeError::NotAGitRepo`] if `repo_path` is not a git
    /// repository.
    pub fn new(
        repo_path: impl Into<PathBuf>,
        worktree_base: Option<PathBuf>,
    ) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.into();

        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--git-dir")
            .current_dir(&repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(WorktreeError::NotAGitRepo(repo_path));
        }

        let worktree_base = worktree_base.unwrap_or_else(|| {
            let repo_name = repo_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("repo");
            let base_name = format!("{repo_name}-foreman-worktrees");
            repo_path
                .parent()
                .map(|p| p.join(&base_name))
                .unwrap_or_else(|| PathBuf::from(base_name))
        });

        Ok(Self {
            repo_path,
            worktree_base,
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn worktree_base(&self) -> &Path {
        &self.worktree_base
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Deterministic branch name for a task, by role: a [`Persistent`]-
    /// policy role (currently only orchestrator tooling) gets
    /// `orch/<task_id>`, breakdown children get `breakdown/<breakdown_id>`,
    /// everything else gets `agent/<task_id>` (no timestamp suffix, so
    /// resuming a task reuses the same branch).
    ///
    /// [`Persistent`]: crate::role::WorktreePolicy::Persistent
    pub fn task_branch_name(role: &str, task_id: &str, breakdown_id: Option<&str>) -> String {
        use crate::role::{WorktreePolicy, descriptor_for_str};

        match (descriptor_for_str(role).worktree_policy, breakdown_id) {
            (WorktreePolicy::Persistent, _) => format!("orch/{task_id}"),
            (_, Some(breakdown_id)) => format!("breakdown/{breakdown_id}"),
            _ => format!("agent/{task_id}"),
        }
    }

    /// Proposer scratch branch for an agent's persistent worktree:
    /// `tooling/<agent_name>-<YYYYMMDD-HHMMSS>`.
    pub fn agent_branch_name(agent_name: &str, now: chrono::DateTime<chrono::Utc>) -> String {
        format!("tooling/{agent_name}-{}", now.format("%Y%m%d-%H%M%S"))
    }

    /// Create (or reuse) a worktree for `branch_name`.
    ///
    /// If a worktree already exists at the expected path:
    /// - branch mismatch is an error (another task's work is sitting there);
    /// - otherwise, the existing worktree is checked against `base_branch`'s
    ///   remote-tracking ref with [`Self::base_is_ancestor`]. If the base has
    ///   diverged (the worktree's branch is stale against `origin/<base>`),
    ///   the worktree is recreated from scratch so the task starts from a
    ///   current base.
    pub fn create_worktree(
        &self,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<WorktreeInfo, WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let dir_name = branch_name.replace('/', "--");
        let worktree_path = self.worktree_base.join(&dir_name);

        if let Ok(existing) = self.find_worktree_by_path(&worktree_path) {
            match &existing.branch {
                Some(branch) if branch == branch_name => {
                    if self.base_is_ancestor_locked(base_branch, &worktree_path)? {
                        tracing::info!(
                            path = %worktree_path.display(),
                            branch = branch_name,
                            "reusing worktree: base is an ancestor"
                        );
                        return Ok(existing);
                    }
                    tracing::warn!(
                        path = %worktree_path.display(),
                        branch = branch_name,
                        base_branch,
                        "base has diverged from worktree's branch, recreating"
                    );
                    self.remove_worktree_locked(&worktree_path)?;
                    let _ = self.delete_branch_locked(branch_name);
                }
                Some(branch) => {
                    return Err(WorktreeError::BranchMismatch {
                        expected: branch_name.to_string(),
                        found: branch.clone(),
                    });
                }
                None => {
                    tracing::info!(
                        path = %worktree_path.display(),
                        "worktree exists with detached HEAD, returning existing"
                    );
                    return Ok(existing);
                }
            }
        }

        if !self.worktree_base.exists() {
            std::fs::create_dir_all(&self.worktree_base).map_err(|e| {
                WorktreeError::GitCommand {
                    message: format!(
                        "failed to create worktree base directory: {}",
                        self.worktree_base.display()
                    ),
                    source: e,
                }
            })?;
        }

        let branch_exists = self.branch_exists_locked(branch_name)?;

        let output = if branch_exists {
            Command::new("git")
                .args(["worktree", "add"])
                .arg(&worktree_path)
                .arg(branch_name)
                .current_dir(&self.repo_path)
                .output()
                .map_err(|e| WorktreeError::GitCommand {
                    message: "failed to run git worktree add".into(),
                    source: e,
                })?
        } else {
            Command::new("git")
                .args(["worktree", "add", "-b"])
                .arg(branch_name)
                .arg(&worktree_path)
                .arg(format!("origin/{base_branch}"))
                .current_dir(&self.repo_path)
                .output()
                .map_err(|e| WorktreeError::GitCommand {
                    message: "failed to run git worktree add -b".into(),
                    source: e,
                })?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            self.cleanup_partial(&worktree_path);
            return Err(WorktreeError::GitExit {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let info = self.find_worktree_by_path(&worktree_path)?;
        self.check_submodule_isolation(&worktree_path);
        Ok(info)
    }

    /// Warn (spec §4.3) when `worktree_path` contains a nested repository
    /// whose `.git` points back into the main checkout's object store —
    /// commits made inside that nested repo would land in the shared store
    /// rather than being isolated to the task's own branch. This never fails
    /// the worktree creation, it only logs.
    fn check_submodule_isolation(&self, worktree_path: &Path) {
        let common_dir = match Command::new("git")
            .args(["rev-parse", "--git-common-dir"])
            .current_dir(&self.repo_path)
            .output()
        {
            Ok(output) if output.status.success() => {
                let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let path = PathBuf::from(raw);
                let path = if path.is_absolute() { path } else { self.repo_path.join(path) };
                match path.canonicalize() {
                    Ok(p) => p,
                    Err(_) => return,
                }
            }
            _ => return,
        };

        for nested_git in find_nested_git_entries(worktree_path) {
            let gitdir = match resolve_gitdir(&nested_git) {
                Some(p) => p,
                None => continue,
            };
            if gitdir.starts_with(&common_dir) {
                tracing::warn!(
                    worktree = %worktree_path.display(),
                    nested = %nested_git.display(),
                    gitdir = %gitdir.display(),
                    "nested repository shares the parent checkout's object store, commits may cross-contaminate"
                );
            }
        }
    }

    /// Whether `origin/<base_branch>` is an ancestor of the worktree's HEAD.
    /// A missing remote ref (the base branch has no remote-tracking copy
    /// yet) counts as a match rather than a hard failure.
    pub fn base_is_ancestor(&self, base_branch: &str, worktree_path: &Path) -> Result<bool, WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.base_is_ancestor_locked(base_branch, worktree_path)
    }

    fn base_is_ancestor_locked(&self, base_branch: &str, worktree_path: &Path) -> Result<bool, WorktreeError> {
        let remote_ref = format!("origin/{base_branch}");

        let verify = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(&remote_ref)
            .current_dir(worktree_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse --verify".into(),
                source: e,
            })?;
        if !verify.status.success() {
            // No remote-tracking ref to compare against: treat as a match.
            return Ok(true);
        }

        let output = Command::new("git")
            .args(["merge-base", "--is-ancestor", &remote_ref, "HEAD"])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git merge-base --is-ancestor".into(),
                source: e,
            })?;

        Ok(output.status.success())
    }

    /// Remove a worktree by its path. Detaches HEAD first so a checked-out
    /// branch does not block removal, then unregisters the worktree.
    /// No-op if the worktree does not exist (idempotent).
    pub fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_worktree_locked(path)
    }

    fn remove_worktree_locked(&self, path: &Path) -> Result<(), WorktreeError> {
        if self.find_worktree_by_path(path).is_err() {
            if path.exists() {
                tracing::warn!(
                    path = %path.display(),
                    "directory exists but not registered as worktree, removing"
                );
                let _ = std::fs::remove_dir_all(path);
            }
            return Ok(());
        }

        // Detach HEAD so the branch (which may still need to be merged or
        // pushed) is freed up, preserving its commits outside this worktree.
        let _ = Command::new("git")
            .args(["checkout", "--detach"])
            .current_dir(path)
            .output();

        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree remove".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Tear down a task's worktree: optionally push `branch_name` to
    /// `origin` first, then detach HEAD. The worktree directory itself is
    /// preserved on disk for debugging, not removed — that is a deliberate
    /// departure from [`Self::remove_worktree`], which is for genuinely
    /// stale/orphaned worktrees. This is a plain push, never force: this
    /// path does not resolve divergence, it only ensures whatever HEAD
    /// currently holds is preserved on origin for the next attempt or for
    /// forensic review. Used by the Lifecycle Controller on reject
    /// (`push=true`) and accept/fail cleanup (`push=false`, the branch has
    /// already been merged or is discarded).
    pub fn cleanup(&self, path: &Path, branch_name: &str, push: bool) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        if push && path.exists() {
            let output = Command::new("git")
                .args(["push", "origin", branch_name])
                .current_dir(path)
                .output()
                .map_err(|e| WorktreeError::GitCommand {
                    message: "failed to run git push".into(),
                    source: e,
                })?;
            if !output.status.success() {
                tracing::warn!(
                    branch = branch_name,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "push during worktree cleanup failed, continuing with detach"
                );
            }
        }

        if path.exists() {
            let output = Command::new("git")
                .args(["checkout", "--detach"])
                .current_dir(path)
                .output()
                .map_err(|e| WorktreeError::GitCommand {
                    message: "failed to run git checkout --detach".into(),
                    source: e,
                })?;
            if !output.status.success() {
                tracing::warn!(
                    path = %path.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "detach during worktree cleanup failed"
                );
            }
        }

        Ok(())
    }

    /// Force-push `branch_name` from `path` with `--force-with-lease`. Used
    /// only by the Rebaser after a successful rebase, which rewrites the
    /// branch's history and so cannot use a plain push.
    pub fn force_push(&self, path: &Path, branch_name: &str) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let output = Command::new("git")
            .args(["push", "origin", branch_name, "--force-with-lease"])
            .current_dir(path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git push --force-with-lease".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(WorktreeError::GitExit {
                command: "push --force-with-lease".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// List all worktrees associated with the main repository.
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree list".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "worktree list".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_porcelain_output(&stdout)
    }

    /// Runs `git worktree prune` to clean up references to worktrees whose
    /// directories have been removed externally.
    pub fn cleanup_stale(&self) -> Result<(), WorktreeError> {
        let output = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree prune".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "worktree prune".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Merge a branch into the current branch of the main repo using `--no-ff`.
    /// Used by the Rebaser's conflict-detection path and by direct-merge
    /// acceptance flows.
    pub fn merge_branch(&self, branch_name: &str) -> Result<MergeResult, WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let output = Command::new("git")
            .args(["merge", "--no-ff", branch_name])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git merge".into(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(MergeResult::Success);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if stderr.contains("CONFLICT") || stdout.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
            let _ = Command::new("git")
                .args(["merge", "--abort"])
                .current_dir(&self.repo_path)
                .output();

            return Ok(MergeResult::Conflict {
                details: format!("{stdout}\n{stderr}").trim().to_string(),
            });
        }

        Err(WorktreeError::GitExit {
            command: "merge".into(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }

    /// Delete a local branch. `-D` (force) since `--no-ff` merges leave the
    /// branch looking unmerged from git's perspective. Idempotent.
    pub fn delete_branch(&self, branch_name: &str) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.delete_branch_locked(branch_name)
    }

    fn delete_branch_locked(&self, branch_name: &str) -> Result<(), WorktreeError> {
        let output = Command::new("git")
            .args(["branch", "-D", branch_name])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git branch -D".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("not found") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "branch -D".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    pub fn checkout(&self, branch_name: &str) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let output = Command::new("git")
            .args(["checkout", branch_name])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git checkout".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "checkout".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.branch_exists_locked(branch_name)
    }

    fn branch_exists_locked(&self, branch_name: &str) -> Result<bool, WorktreeError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify"])
            .arg(format!("refs/heads/{branch_name}"))
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse --verify".into(),
                source: e,
            })?;

        Ok(output.status.success())
    }

    fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, WorktreeError> {
        let worktrees = self.list_worktrees()?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for wt in worktrees {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }

        Err(WorktreeError::ParseError(format!(
            "worktree not found at path: {}",
            path.display()
        )))
    }

    fn cleanup_partial(&self, path: &Path) {
        if path.exists() {
            tracing::warn!(
                path = %path.display(),
                "cleaning up partial worktree directory"
            );
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = self.cleanup_stale();
    }
}

/// Find every `.git` entry strictly below `root` (the worktree's own `.git`
/// at its top level is the expected administrative link and is excluded).
fn find_nested_git_entries(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            // The worktree's own administrative link, not a nested repo.
            continue;
        }
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if file_type.is_dir() {
            walk_for_git_entries(&path, &mut found);
        }
    }

    found
}

fn walk_for_git_entries(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        let is_git_entry = path.file_name().and_then(|n| n.to_str()) == Some(".git");
        if is_git_entry {
            found.push(path);
        } else if file_type.is_dir() {
            walk_for_git_entries(&path, found);
        }
    }
}

/// Resolve a `.git` entry (file or directory) to the actual git directory it
/// points at, canonicalized. A `.git` file holds a single `gitdir: <path>`
/// line (relative paths are relative to the file's own parent directory).
fn resolve_gitdir(git_entry: &Path) -> Option<PathBuf> {
    if git_entry.is_dir() {
        return git_entry.canonicalize().ok();
    }

    let contents = std::fs::read_to_string(git_entry).ok()?;
    let line = contents.lines().find_map(|l| l.strip_prefix("gitdir: "))?;
    let pointed = PathBuf::from(line.trim());
    let pointed = if pointed.is_absolute() {
        pointed
    } else {
        git_entry.parent()?.join(pointed)
    };
    pointed.canonicalize().ok()
}

/// Parse the porcelain output of `git worktree list --porcelain`.
fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, WorktreeError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                    head_commit: head,
                });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string();
            current_branch = Some(branch);
        }
    }

    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeInfo {
            path,
            branch: current_branch,
            head_commit: head,
        });
    }

    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::process::Command;
    use tempfile::TempDir;

    fn create_temp_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let repo_path = dir.path().to_path_buf();

        let status = Command::new("git")
            .args(["init"])
            .current_dir(&repo_path)
            .output()
            .expect("failed to run git init");
        assert!(status.status.success(), "git init failed");

        let _ = Command::new("git")
            .args(["config", "user.email", "test@foreman.dev"])
            .current_dir(&repo_path)
            .output();
        let _ = Command::new("git")
            .args(["config", "user.name", "Foreman Test"])
            .current_dir(&repo_path)
            .output();

        let readme = repo_path.join("README.md");
        std::fs::write(&readme, "# Test repo\n").expect("failed to write README");

        let _ = Command::new("git")
            .args(["add", "."])
            .current_dir(&repo_path)
            .output();

        let status = Command::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(&repo_path)
            .output()
            .expect("failed to run git commit");
        assert!(status.status.success(), "git commit failed");

        (dir, repo_path)
    }

    #[test]
    fn new_with_valid_repo() {
        let (_dir, repo_path) = create_temp_repo();
        let mgr = WorktreeManager::new(&repo_path, None).unwrap();
        assert_eq!(mgr.repo_path(), repo_path);
    }

    #[test]
    fn new_with_invalid_repo() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let result = WorktreeManager::new(dir.path(), None);
        assert!(matches!(result, Err(WorktreeError::NotAGitRepo(_))));
    }

    #[test]
    fn task_branch_name_format() {
        assert_eq!(WorktreeManager::task_branch_name("builder", "t1", None), "agent/t1");
        assert_eq!(
            WorktreeManager::task_branch_name("orchestrator_impl", "t1", None),
            "orch/t1"
        );
        assert_eq!(
            WorktreeManager::task_branch_name("builder", "t1", Some("b1")),
            "breakdown/b1"
        );
    }

    #[test]
    fn agent_branch_name_format() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 2, 11, 10, 7, 46).unwrap();
        assert_eq!(
            WorktreeManager::agent_branch_name("agent-1", now),
            "tooling/agent-1-20260211-100746"
        );
    }

    #[test]
    fn branch_does_not_exist_initially() {
        let (_dir, repo_path) = create_temp_repo();
        let mgr = WorktreeManager::new(&repo_path, None).unwrap();
        assert!(!mgr.branch_exists("agent/t1").unwrap());
    }

    #[test]
    fn create_and_remove_worktree_without_remote() {
        let (_dir, repo_path) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let mgr = WorktreeManager::new(&repo_path, Some(base.path().to_path_buf())).unwrap();

        // No origin configured: `git worktree add -b <branch> <path> origin/<base>`
        // would fail, so create the base branch locally to mirror what a real
        // checkout's HEAD already is.
        let current = Command::new("git")
            .args(["branch", "--show-current"])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        let base_branch = String::from_utf8_lossy(&current.stdout).trim().to_string();

        let branch = WorktreeManager::task_branch_name("builder", "t1", None);
        // Fall back to creating directly off HEAD since there's no `origin`.
        let wt_path = base.path().join(branch.replace('/', "--"));
        let output = Command::new("git")
            .args(["worktree", "add", "-b", &branch])
            .arg(&wt_path)
            .current_dir(&repo_path)
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        let found = mgr.list_worktrees().unwrap();
        assert!(found.iter().any(|w| w.branch.as_deref() == Some(branch.as_str())));

        mgr.remove_worktree(&wt_path).unwrap();
        let after = mgr.list_worktrees().unwrap();
        assert!(!after.iter().any(|w| w.branch.as_deref() == Some(branch.as_str())));

        let _ = base_branch;
    }

    #[test]
    fn finds_nested_git_entry_pointing_at_parent_object_store() {
        let (_dir, repo_path) = create_temp_repo();
        let nested = repo_path.join("vendor/thing");
        std::fs::create_dir_all(&nested).unwrap();
        let parent_git_dir = repo_path.join(".git").canonicalize().unwrap();
        std::fs::write(nested.join(".git"), format!("gitdir: {}\n", parent_git_dir.display())).unwrap();

        let found = find_nested_git_entries(&repo_path);
        assert_eq!(found, vec![nested.join(".git")]);
        assert_eq!(resolve_gitdir(&found[0]).unwrap(), parent_git_dir);
    }

    #[test]
    fn does_not_flag_the_worktree_s_own_git_link() {
        let (_dir, repo_path) = create_temp_repo();
        assert!(find_nested_git_entries(&repo_path).is_empty());
    }

    #[test]
    fn parse_porcelain_handles_detached_and_missing_trailing_blank() {
        let sample = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo-wt\nHEAD def456\ndetached\n";
        let parsed = parse_porcelain_output(sample).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].branch.as_deref(), Some("main"));
        assert_eq!(parsed[1].branch, None);
    }
}
