//! Role tag and its descriptor (spec §9 Design Notes): replaces dynamic role
//! dispatch (string matched ad hoc at each call site) with an explicit
//! tagged variant plus a pure function mapping a role to a descriptor of
//! data the Scheduler and Lifecycle Controller consume uniformly, rather
//! than re-deciding role-specific behavior at every branch. `Task.role` and
//! `AgentBlueprint.role` stay plain `String` — the `tasks.role` column has
//! no `CHECK` constraint and operators can name their own blueprint roles
//! (the config layer's own test fixture uses `role: builder`) — this enum
//! is a typed lookup over the system's own built-in roles, not a type the
//! stored value is coerced into.

use std::str::FromStr;

use foreman_db::models::Queue;

/// One of the system's built-in roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Implementer,
    OrchestratorImpl,
    Breakdown,
    Curator,
    Gatekeeper,
    Rebaser,
    Recycler,
    ProductManager,
    Proposer,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Implementer => "implementer",
            Self::OrchestratorImpl => "orchestrator_impl",
            Self::Breakdown => "breakdown",
            Self::Curator => "curator",
            Self::Gatekeeper => "gatekeeper",
            Self::Rebaser => "rebaser",
            Self::Recycler => "recycler",
            Self::ProductManager => "product_manager",
            Self::Proposer => "proposer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "implementer" => Self::Implementer,
            "orchestrator_impl" => Self::OrchestratorImpl,
            "breakdown" => Self::Breakdown,
            "curator" => Self::Curator,
            "gatekeeper" => Self::Gatekeeper,
            "rebaser" => Self::Rebaser,
            "recycler" | "burnout-recycler" => Self::Recycler,
            "product_manager" => Self::ProductManager,
            "proposer" => Self::Proposer,
            _ => return Err(()),
        })
    }
}

/// Whether a role gets a fresh worktree per task, or reuses one long-lived
/// scratch worktree across tasks (spec §4.3's Proposer scratch branch and
/// the orchestrator-tooling `orch/<task_id>` naming, which drops the
/// timestamp suffix so resuming a task reuses the same branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreePolicy {
    PerTask,
    Persistent,
}

/// Pure descriptor for a role (spec §9): "data, not code; the scheduler
/// consumes it uniformly".
#[derive(Debug, Clone, Copy)]
pub struct RoleDescriptor {
    pub allowed_tools: &'static [&'static str],
    pub max_turns: i32,
    pub worktree_policy: WorktreePolicy,
    pub claim_queue_filter: &'static [Queue],
}

const IMPLEMENTER_TOOLS: &[&str] = &["read", "write", "bash", "git"];
const REVIEW_TOOLS: &[&str] = &["read", "bash", "git"];
const PLANNING_TOOLS: &[&str] = &["read", "write"];

/// Map a role to its descriptor.
pub const fn descriptor(role: Role) -> RoleDescriptor {
    match role {
        Role::Implementer => RoleDescriptor {
            allowed_tools: IMPLEMENTER_TOOLS,
            max_turns: 60,
            worktree_policy: WorktreePolicy::PerTask,
            claim_queue_filter: &[Queue::Incoming],
        },
        Role::OrchestratorImpl => RoleDescriptor {
            allowed_tools: IMPLEMENTER_TOOLS,
            max_turns: 60,
            worktree_policy: WorktreePolicy::Persistent,
            claim_queue_filter: &[Queue::Incoming],
        },
        Role::Breakdown => RoleDescriptor {
            allowed_tools: PLANNING_TOOLS,
            max_turns: 20,
            worktree_policy: WorktreePolicy::PerTask,
            claim_queue_filter: &[Queue::Incoming],
        },
        Role::Curator => RoleDescriptor {
            allowed_tools: PLANNING_TOOLS,
            max_turns: 20,
            worktree_policy: WorktreePolicy::PerTask,
            claim_queue_filter: &[Queue::Incoming],
        },
        Role::Gatekeeper => RoleDescriptor {
            allowed_tools: REVIEW_TOOLS,
            max_turns: 30,
            worktree_policy: WorktreePolicy::PerTask,
            claim_queue_filter: &[Queue::Provisional],
        },
        Role::Rebaser => RoleDescriptor {
            allowed_tools: REVIEW_TOOLS,
            max_turns: 10,
            worktree_policy: WorktreePolicy::Persistent,
            claim_queue_filter: &[],
        },
        Role::Recycler => RoleDescriptor {
            allowed_tools: PLANNING_TOOLS,
            max_turns: 10,
            worktree_policy: WorktreePolicy::Persistent,
            claim_queue_filter: &[],
        },
        Role::ProductManager => RoleDescriptor {
            allowed_tools: PLANNING_TOOLS,
            max_turns: 30,
            worktree_policy: WorktreePolicy::Persistent,
            claim_queue_filter: &[Queue::Incoming],
        },
        Role::Proposer => RoleDescriptor {
            allowed_tools: PLANNING_TOOLS,
            max_turns: 30,
            worktree_policy: WorktreePolicy::Persistent,
            claim_queue_filter: &[Queue::Incoming],
        },
    }
}

/// Descriptor for a role string that may not be a built-in role (an
/// operator-defined blueprint name). Unknown roles fall back to the
/// implementer descriptor — a fresh per-task worktree is the safe default
/// for a custom blueprint doing implementer-shaped work.
pub fn descriptor_for_str(role: &str) -> RoleDescriptor {
    match role.parse::<Role>() {
        Ok(r) => descriptor(r),
        Err(()) => descriptor(Role::Implementer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_roles_round_trip_through_display_and_from_str() {
        for role in [
            Role::Implementer,
            Role::OrchestratorImpl,
            Role::Breakdown,
            Role::Curator,
            Role::Gatekeeper,
            Role::Rebaser,
            Role::Recycler,
            Role::ProductManager,
            Role::Proposer,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_falls_back_to_implementer_descriptor() {
        let fallback = descriptor_for_str("builder");
        let implementer = descriptor(Role::Implementer);
        assert_eq!(fallback.max_turns, implementer.max_turns);
        assert_eq!(fallback.worktree_policy, implementer.worktree_policy);
    }

    #[test]
    fn orchestrator_impl_worktree_is_persistent() {
        assert_eq!(descriptor(Role::OrchestratorImpl).worktree_policy, WorktreePolicy::Persistent);
        assert_eq!(descriptor(Role::Implementer).worktree_policy, WorktreePolicy::PerTask);
    }
}
