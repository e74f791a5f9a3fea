pub mod inbox;
pub mod projects;
pub mod tasks;
pub mod threads;

// `agent_events`, `gate_results`, `invariants`, and `plans` queried the
// plan/invariant-library schema this workspace doesn't carry, and were
// removed in the final trim pass (see DESIGN.md).
