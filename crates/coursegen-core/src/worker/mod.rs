//! Worker re-entry loop.
//!
//! Each queue message triggers at most one step execution: the worker locks
//! the job row inside a transaction, runs the first pending step, persists
//! the results, advances `current_step_index`, and re-enqueues itself while
//! pending steps remain. Progress across the pipeline is driven entirely by
//! this self-re-enqueueing, giving at-least-once, order_index-ordered
//! execution with no long-running process per job.

pub mod executor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use coursegen_db::models::{Job, JobStatus, Step, StepKind, StepStatus};
use coursegen_db::queries::queue;

use crate::llm::ProviderRegistry;
use crate::search::SearchClient;
use crate::state::{JobStateMachine, StepStateMachine};
use executor::{ExecutionEnv, StepOutcome};

/// Shared collaborators for the worker. The registry is shared with the
/// HTTP layer, which uses it for chat.
pub struct WorkerEnv {
    pub registry: Arc<ProviderRegistry>,
    pub search: Option<SearchClient>,
}

/// What a single worker invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The queue was empty.
    Idle,
    /// A message was consumed but the job was missing or already terminal.
    MessageDropped { job_id: Uuid },
    /// One step ran to completion. When `remaining` is zero the job and
    /// project were also marked completed/ready.
    StepExecuted {
        job_id: Uuid,
        step_type: StepKind,
        remaining: i64,
    },
    /// A message arrived for a job with no pending steps left; the job was
    /// marked completed.
    JobCompleted { job_id: Uuid },
    /// The step errored; step, job, and project were marked failed.
    JobFailed { job_id: Uuid },
}

/// Consume one queue message and execute at most one step.
///
/// The whole invocation runs inside a single transaction: the dequeue, the
/// `SELECT ... FOR UPDATE` row lock on the job, the step execution, and the
/// result writes all commit together. The transaction-scoped row lock is
/// the only protection against concurrent workers touching the same job,
/// and it is held across the in-flight LLM call -- there is no timeout or
/// cancellation propagation into a step already running.
pub async fn run_worker_tick(pool: &PgPool, env: &WorkerEnv) -> Result<TickOutcome> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let Some(message) = queue::dequeue_job(&mut tx).await? else {
        tx.commit().await.context("failed to commit transaction")?;
        return Ok(TickOutcome::Idle);
    };
    let job_id = message.job_id;

    // Lock the job row for the duration of the tick.
    let job: Option<Job> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock job row")?;

    let Some(job) = job else {
        tracing::warn!(job_id = %job_id, "queue message for unknown job, dropping");
        tx.commit().await.context("failed to commit transaction")?;
        return Ok(TickOutcome::MessageDropped { job_id });
    };

    if job.status.is_terminal() {
        tracing::info!(
            job_id = %job_id,
            status = %job.status,
            "queue message for terminal job, dropping"
        );
        tx.commit().await.context("failed to commit transaction")?;
        return Ok(TickOutcome::MessageDropped { job_id });
    }

    // First pending step in order.
    let step: Option<Step> = sqlx::query_as(
        "SELECT * FROM steps \
         WHERE job_id = $1 AND status = 'pending' \
         ORDER BY order_index ASC \
         LIMIT 1",
    )
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to fetch first pending step")?;

    let Some(step) = step else {
        // Nothing left to run: the pipeline is done.
        complete_job(&mut tx, &job).await?;
        tx.commit().await.context("failed to commit transaction")?;
        tracing::info!(job_id = %job_id, "job completed");
        return Ok(TickOutcome::JobCompleted { job_id });
    };

    // queued -> processing on the first executed step. The state machines
    // run on the transaction so the locked row is the one they update.
    if job.status == JobStatus::Queued {
        JobStateMachine::transition(&mut tx, job_id, JobStatus::Queued, JobStatus::Processing)
            .await?;
    }

    StepStateMachine::transition(&mut tx, step.id, StepStatus::Pending, StepStatus::Processing)
        .await?;

    tracing::info!(
        job_id = %job_id,
        step_id = %step.id,
        step_type = %step.step_type,
        order_index = step.order_index,
        "executing step"
    );

    // Execute while the transaction (and row lock) is held. Context reads
    // inside the executor see only data committed by previous ticks.
    let exec_env = ExecutionEnv {
        pool,
        registry: &env.registry,
        search: env.search.as_ref(),
    };
    let result = match executor::validate_step(&step) {
        Ok(()) => executor::execute_step(&exec_env, &job, &step).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            persist_outcome(&mut tx, &job, &step, &outcome).await?;

            let remaining: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM steps WHERE job_id = $1 AND status = 'pending'",
            )
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to count remaining steps")?;
            let remaining = remaining.0;

            if remaining > 0 {
                queue::enqueue_job(&mut *tx, job_id).await?;
            } else {
                complete_job(&mut tx, &job).await?;
            }

            tx.commit().await.context("failed to commit transaction")?;
            tracing::info!(
                job_id = %job_id,
                step_type = %step.step_type,
                remaining,
                "step completed"
            );
            Ok(TickOutcome::StepExecuted {
                job_id,
                step_type: step.step_type,
                remaining,
            })
        }
        Err(e) => {
            let error = format!("{e:#}");
            tracing::error!(
                job_id = %job_id,
                step_id = %step.id,
                step_type = %step.step_type,
                error = %error,
                "step failed"
            );

            // No automatic retry: step, job, and project all go to failed.
            sqlx::query(
                "UPDATE steps SET status = 'failed', error = $1, completed_at = NOW() \
                 WHERE id = $2",
            )
            .bind(&error)
            .bind(step.id)
            .execute(&mut *tx)
            .await
            .context("failed to mark step failed")?;

            sqlx::query(
                "UPDATE jobs SET status = 'failed', error = $1, completed_at = NOW() \
                 WHERE id = $2",
            )
            .bind(&error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .context("failed to mark job failed")?;

            sqlx::query("UPDATE projects SET status = 'failed', updated_at = NOW() WHERE id = $1")
                .bind(job.project_id)
                .execute(&mut *tx)
                .await
                .context("failed to mark project failed")?;

            tx.commit().await.context("failed to commit transaction")?;
            Ok(TickOutcome::JobFailed { job_id })
        }
    }
}

/// Persist a successful step outcome inside the worker's transaction.
async fn persist_outcome(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job: &Job,
    step: &Step,
    outcome: &StepOutcome,
) -> Result<()> {
    for update in &outcome.artifact_updates {
        let assets_json = serde_json::Value::Array(update.new_assets.clone());
        let rows = sqlx::query(
            "UPDATE artifacts \
             SET content_text = COALESCE($1, content_text), \
                 content_json = COALESCE($2, content_json), \
                 assets = assets || $3, \
                 status = CASE WHEN $4 THEN 'completed' ELSE status END, \
                 updated_at = NOW() \
             WHERE job_id = $5 AND artifact_type = $6",
        )
        .bind(update.content_text.as_deref())
        .bind(update.content_json.as_ref())
        .bind(assets_json)
        .bind(update.mark_completed)
        .bind(job.id)
        .bind(update.artifact_type)
        .execute(&mut **tx)
        .await
        .context("failed to apply artifact update")?;

        if rows.rows_affected() == 0 {
            anyhow::bail!(
                "artifact {} missing for job {} -- artifact rows must exist before steps write \
                 to them",
                update.artifact_type,
                job.id
            );
        }
    }

    sqlx::query(
        "UPDATE steps \
         SET status = 'completed', \
             output = COALESCE(output, '{}'::jsonb) || COALESCE($1, '{}'::jsonb), \
             log = $2, \
             completed_at = NOW() \
         WHERE id = $3",
    )
    .bind(outcome.output.as_ref())
    .bind(&outcome.log)
    .bind(step.id)
    .execute(&mut **tx)
    .await
    .context("failed to complete step")?;

    sqlx::query("UPDATE jobs SET current_step_index = $1 WHERE id = $2")
        .bind(step.order_index + 1)
        .bind(job.id)
        .execute(&mut **tx)
        .await
        .context("failed to advance current step index")?;

    Ok(())
}

/// Mark a job and its project completed/ready.
async fn complete_job(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, job: &Job) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'completed', completed_at = NOW() \
         WHERE id = $1 AND status IN ('queued', 'processing')",
    )
    .bind(job.id)
    .execute(&mut **tx)
    .await
    .context("failed to mark job completed")?;

    sqlx::query("UPDATE projects SET status = 'ready', updated_at = NOW() WHERE id = $1")
        .bind(job.project_id)
        .execute(&mut **tx)
        .await
        .context("failed to mark project ready")?;

    Ok(())
}

/// Poll the queue until cancelled.
///
/// Runs [`run_worker_tick`] in a loop, sleeping `idle_sleep` when the queue
/// is empty. Tick errors are logged and do not stop the loop; the failed
/// tick's transaction rolled back, so its message is redelivered.
pub async fn run_worker_loop(
    pool: &PgPool,
    env: &WorkerEnv,
    cancel: CancellationToken,
    idle_sleep: Duration,
) -> Result<()> {
    tracing::info!("worker loop started");
    loop {
        if cancel.is_cancelled() {
            tracing::info!("worker loop stopped");
            return Ok(());
        }

        let outcome = run_worker_tick(pool, env).await;
        let idle = match outcome {
            Ok(TickOutcome::Idle) => true,
            Ok(_) => false,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "worker tick failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(idle_sleep) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}
