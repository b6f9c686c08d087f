//! Database query functions for the `jobs` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{GenerationOptions, Job, JobStatus, RequestedOutputs};

/// Insert a new job row. Returns the inserted job with server-generated
/// defaults (id, status, current_step_index, created_at).
pub async fn insert_job(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
    ai_model: &str,
    requested_outputs: &RequestedOutputs,
    options: &GenerationOptions,
) -> Result<Job> {
    let job = sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (project_id, user_id, ai_model, requested_outputs, options) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(user_id)
    .bind(ai_model)
    .bind(Json(requested_outputs))
    .bind(Json(options))
    .fetch_one(pool)
    .await
    .context("failed to insert job")?;

    Ok(job)
}

/// Fetch a single job by ID.
///
/// Generic over the executor so it can also run on an open transaction.
pub async fn get_job<'e, E>(executor: E, id: Uuid) -> Result<Option<Job>>
where
    E: sqlx::PgExecutor<'e>,
{
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch job")?;

    Ok(job)
}

/// List the most recently created jobs across all projects.
pub async fn list_recent_jobs(pool: &PgPool, limit: i64) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("failed to list recent jobs")?;

    Ok(jobs)
}

/// Fetch the active (queued or processing) job for a project, if any.
///
/// Used to reject a second concurrent generation run for the same project.
pub async fn get_active_job_for_project(pool: &PgPool, project_id: Uuid) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs \
         WHERE project_id = $1 AND status IN ('queued', 'processing') \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch active job for project")?;

    Ok(job)
}

/// Atomically transition a job from one status to another.
///
/// Uses optimistic locking: the UPDATE's WHERE clause includes
/// `status = $from`, so the row is only updated if the current status
/// matches the expected `from` value. Returns the number of rows
/// affected (0 means the status did not match).
///
/// Generic over the executor so the worker can run it inside the
/// transaction holding the job row lock.
pub async fn transition_job_status<'e, E>(
    executor: E,
    job_id: Uuid,
    from: JobStatus,
    to: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = $1, \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at) \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(job_id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition job status")?;

    Ok(result.rows_affected())
}

/// Cancel a job from any non-terminal status.
///
/// Returns the number of rows affected (0 means the job was already in a
/// terminal status, or does not exist).
pub async fn cancel_job(pool: &PgPool, job_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'cancelled', completed_at = NOW() \
         WHERE id = $1 AND status IN ('queued', 'processing')",
    )
    .bind(job_id)
    .execute(pool)
    .await
    .context("failed to cancel job")?;

    Ok(result.rows_affected())
}

/// Mark a job as failed, capturing the error message.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'failed', error = $1, completed_at = NOW() \
         WHERE id = $2 AND status IN ('queued', 'processing')",
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await
    .context("failed to mark job failed")?;

    Ok(result.rows_affected())
}

/// Advance `current_step_index` past the step that just finished.
pub async fn advance_current_step_index(pool: &PgPool, job_id: Uuid, index: i32) -> Result<()> {
    sqlx::query("UPDATE jobs SET current_step_index = $1 WHERE id = $2")
        .bind(index)
        .bind(job_id)
        .execute(pool)
        .await
        .context("failed to advance current step index")?;

    Ok(())
}
