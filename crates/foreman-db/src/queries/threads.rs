//! Query functions for per-task thread messages (spec §4.9 Review Feedback
//! Loop): append-only, never spliced into the task brief file.

use sqlx::PgPool;

use crate::models::{StoreError, ThreadMessage, ThreadRole};

pub async fn append_message(
    pool: &PgPool,
    task_id: &str,
    author: &str,
    role: ThreadRole,
    content: &str,
) -> Result<ThreadMessage, StoreError> {
    let message = sqlx::query_as::<_, ThreadMessage>(
        "INSERT INTO thread_messages (task_id, author, role, content) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(task_id)
    .bind(author)
    .bind(role)
    .bind(content)
    .fetch_one(pool)
    .await?;

    Ok(message)
}

/// Every message for a task, in wall-clock order.
pub async fn list_messages(pool: &PgPool, task_id: &str) -> Result<Vec<ThreadMessage>, StoreError> {
    let messages = sqlx::query_as::<_, ThreadMessage>(
        "SELECT * FROM thread_messages WHERE task_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(messages)
}

/// Most recent rejection message, used to feed the next attempt's context
/// without rewriting the task brief.
pub async fn latest_rejection(pool: &PgPool, task_id: &str) -> Result<Option<ThreadMessage>, StoreError> {
    let message = sqlx::query_as::<_, ThreadMessage>(
        "SELECT * FROM thread_messages WHERE task_id = $1 AND role = 'rejection' \
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(message)
}

/// Delete every message for a task (Lifecycle Controller's accept cleanup,
/// spec §4.4: "delete notes, delete thread" once a task is done).
pub async fn delete_messages(pool: &PgPool, task_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM thread_messages WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(())
}
