//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Job, Project, ProjectStatus};

/// Insert a new project row. Returns the inserted project with
/// server-generated defaults (id, status, timestamps).
pub async fn insert_project(pool: &PgPool, name: &str, brief: &str) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, brief) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(brief)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a single project by ID.
pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// Update the status of a project, bumping `updated_at`.
pub async fn update_project_status(pool: &PgPool, id: Uuid, status: ProjectStatus) -> Result<()> {
    let result = sqlx::query("UPDATE projects SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update project status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Fetch the most recently created job for a project, if any.
///
/// A project may accumulate many jobs over time; only the latest one is
/// actively used.
pub async fn latest_job_for_project(pool: &PgPool, project_id: Uuid) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE project_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest job for project")?;

    Ok(job)
}
