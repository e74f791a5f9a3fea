//! Query functions for the `projects` table: optional groupings that tasks
//! can attach to (spec §3 "Project").

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Project, ProjectStatus, StoreError};

pub async fn create_project(
    pool: &PgPool,
    title: &str,
    branch: &str,
    base_branch: &str,
) -> Result<Project, StoreError> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (title, branch, base_branch, status) \
         VALUES ($1, $2, $3, 'draft') RETURNING *",
    )
    .bind(title)
    .bind(branch)
    .bind(base_branch)
    .fetch_one(pool)
    .await?;

    Ok(project)
}

pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Project, StoreError> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>, StoreError> {
    let projects = sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at ASC")
        .fetch_all(pool)
        .await?;
    Ok(projects)
}

pub async fn set_project_status(pool: &PgPool, id: Uuid, status: ProjectStatus) -> Result<Project, StoreError> {
    let project = sqlx::query_as::<_, Project>(
        "UPDATE projects SET status = $1 WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    project.ok_or_else(|| StoreError::NotFound(id.to_string()))
}

/// A project is ready to merge once every task attached to it sits in an
/// accepting queue (`done` or `cancelled`) — used to decide the
/// `ready-for-pr` transition.
pub async fn project_tasks_all_accepted(pool: &PgPool, project_id: Uuid) -> Result<bool, StoreError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE project_id = $1 AND queue NOT IN ('done', 'cancelled')",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0 == 0)
}
