//! Postgres-backed Task Store Client.
//!
//! This crate is the direct-Postgres facade described in the workspace's
//! transport decision: rather than a separate HTTP hop, the store's
//! `create/get/list/claim/submit/accept/reject/update/delete` surface is a
//! library API backed by `sqlx` and compare-and-set `version` columns.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
pub use models::{
    Hook, HookPoint, HookStatus, HookType, InboxMessage, MergeMethod, ParseEnumError, Priority,
    Project, ProjectStatus, Queue, StoreError, Task, ThreadMessage, ThreadRole,
};
