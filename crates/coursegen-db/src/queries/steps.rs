//! Database query functions for the `steps` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Step, StepKind, StepStatus};

/// Insert a new step row at an explicit order index. Returns the inserted
/// step with server-generated defaults (id, status, created_at).
///
/// The `UNIQUE (job_id, order_index)` constraint rejects duplicate indices,
/// which keeps step ordering the planner's single source of truth.
pub async fn insert_step(
    pool: &PgPool,
    job_id: Uuid,
    step_type: StepKind,
    title: &str,
    order_index: i32,
    input: Option<&serde_json::Value>,
) -> Result<Step> {
    let step = sqlx::query_as::<_, Step>(
        "INSERT INTO steps (job_id, step_type, title, order_index, input) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(job_id)
    .bind(step_type)
    .bind(title)
    .bind(order_index)
    .bind(input)
    .fetch_one(pool)
    .await
    .context("failed to insert step")?;

    Ok(step)
}

/// Fetch a single step by ID.
///
/// Generic over the executor so it can also run on an open transaction.
pub async fn get_step<'e, E>(executor: E, id: Uuid) -> Result<Option<Step>>
where
    E: sqlx::PgExecutor<'e>,
{
    let step = sqlx::query_as::<_, Step>("SELECT * FROM steps WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch step")?;

    Ok(step)
}

/// List all steps for a job, ordered by order_index.
pub async fn list_steps_for_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<Step>> {
    let steps = sqlx::query_as::<_, Step>(
        "SELECT * FROM steps WHERE job_id = $1 ORDER BY order_index ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .context("failed to list steps for job")?;

    Ok(steps)
}

/// Fetch the first pending step for a job in order_index order.
pub async fn first_pending_step(pool: &PgPool, job_id: Uuid) -> Result<Option<Step>> {
    let step = sqlx::query_as::<_, Step>(
        "SELECT * FROM steps \
         WHERE job_id = $1 AND status = 'pending' \
         ORDER BY order_index ASC \
         LIMIT 1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch first pending step")?;

    Ok(step)
}

/// The next free order_index for a job (`MAX + 1`, or 0 for an empty job).
///
/// Chat-appended revision steps land here so they run after everything the
/// planner scheduled.
pub async fn next_order_index(pool: &PgPool, job_id: Uuid) -> Result<i32> {
    let row: (Option<i32>,) =
        sqlx::query_as("SELECT MAX(order_index) FROM steps WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(pool)
            .await
            .context("failed to compute next order index")?;

    Ok(row.0.map_or(0, |max| max + 1))
}

/// Count the pending steps remaining for a job.
pub async fn count_pending_steps(pool: &PgPool, job_id: Uuid) -> Result<i64> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM steps WHERE job_id = $1 AND status = 'pending'")
            .bind(job_id)
            .fetch_one(pool)
            .await
            .context("failed to count pending steps")?;

    Ok(row.0)
}

/// Atomically transition a step from one status to another.
///
/// Optimistic locking via `status = $from` in the WHERE clause. Returns the
/// number of rows affected (0 means the status did not match).
///
/// Generic over the executor so the worker can run it inside the
/// transaction holding the job row lock.
pub async fn transition_step_status<'e, E>(
    executor: E,
    step_id: Uuid,
    from: StepStatus,
    to: StepStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE steps \
         SET status = $1, \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at) \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(step_id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition step status")?;

    Ok(result.rows_affected())
}

/// Record a successful step execution: merge the structured output, set the
/// log line, and mark the step completed.
pub async fn complete_step(
    pool: &PgPool,
    step_id: Uuid,
    output: Option<&serde_json::Value>,
    log: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE steps \
         SET status = 'completed', \
             output = COALESCE(output, '{}'::jsonb) || COALESCE($1, '{}'::jsonb), \
             log = $2, \
             completed_at = NOW() \
         WHERE id = $3 AND status = 'processing'",
    )
    .bind(output)
    .bind(log)
    .bind(step_id)
    .execute(pool)
    .await
    .context("failed to complete step")?;

    Ok(result.rows_affected())
}

/// Mark a step as failed, capturing the error message.
pub async fn fail_step(pool: &PgPool, step_id: Uuid, error: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE steps \
         SET status = 'failed', error = $1, completed_at = NOW() \
         WHERE id = $2 AND status = 'processing'",
    )
    .bind(error)
    .bind(step_id)
    .execute(pool)
    .await
    .context("failed to mark step failed")?;

    Ok(result.rows_affected())
}

/// Cancel all pending steps for a job. Returns the number of steps
/// cancelled.
pub async fn cancel_pending_steps(pool: &PgPool, job_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE steps \
         SET status = 'cancelled', completed_at = NOW() \
         WHERE job_id = $1 AND status = 'pending'",
    )
    .bind(job_id)
    .execute(pool)
    .await
    .context("failed to cancel pending steps")?;

    Ok(result.rows_affected())
}

/// Fetch the output of the most recent completed step of a given kind.
///
/// Downstream steps read upstream context (interpret, web_search) through
/// this query rather than in-memory chaining, because the worker re-enters
/// per queue message.
pub async fn latest_completed_output(
    pool: &PgPool,
    job_id: Uuid,
    step_type: StepKind,
) -> Result<Option<serde_json::Value>> {
    let row: Option<(Option<serde_json::Value>,)> = sqlx::query_as(
        "SELECT output FROM steps \
         WHERE job_id = $1 AND step_type = $2 AND status = 'completed' \
         ORDER BY order_index DESC \
         LIMIT 1",
    )
    .bind(job_id)
    .bind(step_type)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest completed step output")?;

    Ok(row.and_then(|(output,)| output))
}

/// Status counts for a job's steps.
#[derive(Debug, Clone, Default)]
pub struct StepProgress {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Get a summary of step counts by status for a given job.
pub async fn get_step_progress(pool: &PgPool, job_id: Uuid) -> Result<StepProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt \
         FROM steps \
         WHERE job_id = $1 \
         GROUP BY status",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .context("failed to get step progress")?;

    let mut progress = StepProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "processing" => progress.processing = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            "cancelled" => progress.cancelled = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}
