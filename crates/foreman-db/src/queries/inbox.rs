//! Query functions for the human-visible inbox (spec §6 `shared/messages/`):
//! distinct from the per-task `thread_messages` log, this is where fatal
//! lifecycle events land so a human can see them without opening a specific
//! task.

use sqlx::PgPool;

use crate::models::{InboxMessage, StoreError};

pub async fn post(
    pool: &PgPool,
    scope: &str,
    task_id: Option<&str>,
    reason: &str,
    task_log_path: Option<&str>,
) -> Result<InboxMessage, StoreError> {
    let message = sqlx::query_as::<_, InboxMessage>(
        "INSERT INTO inbox_messages (scope, task_id, reason, task_log_path) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(scope)
    .bind(task_id)
    .bind(reason)
    .bind(task_log_path)
    .fetch_one(pool)
    .await?;

    Ok(message)
}

/// Every inbox message for `scope`, most recent first.
pub async fn list_messages(pool: &PgPool, scope: &str) -> Result<Vec<InboxMessage>, StoreError> {
    let messages = sqlx::query_as::<_, InboxMessage>(
        "SELECT * FROM inbox_messages WHERE scope = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(scope)
    .fetch_all(pool)
    .await?;

    Ok(messages)
}
