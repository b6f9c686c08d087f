//! `coursegen work` command: run the worker loop (or a single tick)
//! against the storage queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use coursegen_core::worker::{self, TickOutcome, WorkerEnv};

use crate::config::CoursegenConfig;

/// Run the worker.
///
/// With `once` set, consumes at most one queue message and prints what
/// happened; otherwise polls until Ctrl+C.
pub async fn run_work(pool: &PgPool, config: &CoursegenConfig, once: bool) -> Result<()> {
    let env = WorkerEnv {
        registry: Arc::new(config.build_registry()?),
        search: config.build_search(),
    };

    if once {
        let outcome = worker::run_worker_tick(pool, &env).await?;
        match outcome {
            TickOutcome::Idle => println!("Queue is empty."),
            TickOutcome::MessageDropped { job_id } => {
                println!("Dropped message for job {job_id} (missing or terminal).");
            }
            TickOutcome::StepExecuted {
                job_id,
                step_type,
                remaining,
            } => {
                println!("Job {job_id}: executed {step_type}, {remaining} steps remaining.");
            }
            TickOutcome::JobCompleted { job_id } => println!("Job {job_id} completed."),
            TickOutcome::JobFailed { job_id } => println!("Job {job_id} failed."),
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    worker::run_worker_loop(pool, &env, cancel, Duration::from_millis(500)).await
}
