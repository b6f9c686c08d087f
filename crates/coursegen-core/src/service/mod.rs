//! Generation service layer.
//!
//! Orchestrates starting a generation run: inserting the job, its planned
//! steps, and the draft artifact rows within a single database transaction,
//! then enqueueing the first worker message. Also owns cancellation.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use coursegen_db::models::{GenerationOptions, Job, RequestedOutputs};
use coursegen_db::queries::{jobs as job_db, projects as project_db, queue};

use crate::planner;

/// Parameters for starting a generation run.
#[derive(Debug, Clone)]
pub struct StartGenerationRequest {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub ai_model: String,
    pub outputs: RequestedOutputs,
    pub options: GenerationOptions,
}

/// Start a generation run for a project.
///
/// Inserts the job row, the planner's step list (order_index 0..n), and one
/// draft artifact row per requested output inside a single transaction, then
/// flips the project to generating and enqueues `{job_id}`. If any insert
/// fails the entire operation is rolled back.
pub async fn start_generation(pool: &PgPool, request: &StartGenerationRequest) -> Result<Job> {
    if !request.outputs.any() {
        bail!("at least one output type must be requested");
    }

    let project = project_db::get_project(pool, request.project_id)
        .await?
        .with_context(|| format!("project {} not found", request.project_id))?;

    let steps = planner::plan_steps(&request.outputs, &request.options);

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    // 1. Insert the job row.
    let job = sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (project_id, user_id, ai_model, requested_outputs, options) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(project.id)
    .bind(request.user_id)
    .bind(&request.ai_model)
    .bind(Json(&request.outputs))
    .bind(Json(&request.options))
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert job")?;

    // 2. Insert the planned steps. The planner's ordering is the single
    //    source of truth; order_index mirrors its positions exactly.
    for (index, descriptor) in steps.iter().enumerate() {
        sqlx::query(
            "INSERT INTO steps (job_id, step_type, title, order_index) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job.id)
        .bind(descriptor.kind)
        .bind(&descriptor.title)
        .bind(index as i32)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert step {:?}", descriptor.kind))?;
    }

    // 3. Create draft artifact rows before any step can write to them.
    for artifact_type in request.outputs.types() {
        sqlx::query(
            "INSERT INTO artifacts (job_id, artifact_type) VALUES ($1, $2) \
             ON CONFLICT (job_id, artifact_type) DO NOTHING",
        )
        .bind(job.id)
        .bind(artifact_type)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert artifact {artifact_type}"))?;
    }

    // 4. The project is generating again.
    sqlx::query("UPDATE projects SET status = 'generating', updated_at = NOW() WHERE id = $1")
        .bind(project.id)
        .execute(&mut *tx)
        .await
        .context("failed to update project status")?;

    // 5. Hand the job to the worker.
    queue::enqueue_job(&mut *tx, job.id).await?;

    tx.commit().await.context("failed to commit transaction")?;

    tracing::info!(
        job_id = %job.id,
        project_id = %project.id,
        steps = steps.len(),
        model = %job.ai_model,
        "generation started"
    );

    Ok(job)
}

/// Cancel a job from any non-terminal status.
///
/// Marks the job cancelled, all of its pending steps cancelled, and the
/// project cancelled. A step already in flight is not interrupted --
/// cancellation only prevents future pending steps from running.
pub async fn cancel_generation(pool: &PgPool, job_id: Uuid) -> Result<Job> {
    let job = job_db::get_job(pool, job_id)
        .await?
        .with_context(|| format!("job {} not found", job_id))?;

    if job.status.is_terminal() {
        bail!(
            "cannot cancel job {}: status is already {}",
            job_id,
            job.status
        );
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let rows = sqlx::query(
        "UPDATE jobs SET status = 'cancelled', completed_at = NOW() \
         WHERE id = $1 AND status IN ('queued', 'processing')",
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await
    .context("failed to cancel job")?;

    if rows.rows_affected() == 0 {
        // Lost the race with the worker finishing or failing the job.
        bail!("job {} reached a terminal status concurrently", job_id);
    }

    sqlx::query(
        "UPDATE steps SET status = 'cancelled', completed_at = NOW() \
         WHERE job_id = $1 AND status = 'pending'",
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await
    .context("failed to cancel pending steps")?;

    sqlx::query("UPDATE projects SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
        .bind(job.project_id)
        .execute(&mut *tx)
        .await
        .context("failed to update project status")?;

    tx.commit().await.context("failed to commit transaction")?;

    tracing::info!(job_id = %job_id, "generation cancelled");

    let cancelled = job_db::get_job(pool, job_id)
        .await?
        .with_context(|| format!("job {} disappeared after cancel", job_id))?;
    Ok(cancelled)
}
