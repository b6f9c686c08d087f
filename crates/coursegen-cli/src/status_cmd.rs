//! `coursegen status` command: show job progress and per-step status.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use coursegen_db::queries::artifacts as artifact_db;
use coursegen_db::queries::jobs as job_db;
use coursegen_db::queries::steps as step_db;

/// Run the status command.
///
/// When `job_id_str` is `Some`, shows detailed status for that job.
/// When `None`, lists recent jobs with a progress summary.
pub async fn run_status(pool: &PgPool, job_id_str: Option<&str>) -> Result<()> {
    match job_id_str {
        Some(id_str) => run_job_status(pool, id_str).await,
        None => run_recent_jobs(pool).await,
    }
}

/// Show detailed status for a single job.
async fn run_job_status(pool: &PgPool, job_id_str: &str) -> Result<()> {
    let job_id =
        Uuid::parse_str(job_id_str).with_context(|| format!("invalid job ID: {job_id_str}"))?;

    let job = job_db::get_job(pool, job_id)
        .await?
        .with_context(|| format!("job {job_id} not found"))?;

    println!("Job: {}", job.id);
    println!("Project: {}", job.project_id);
    println!("Model: {}", job.ai_model);
    println!("Status: {}", job.status);
    println!("Current step index: {}", job.current_step_index);
    if let Some(error) = &job.error {
        println!("Error: {error}");
    }
    if let Some(completed_at) = job.completed_at {
        println!(
            "Completed: {}",
            completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();

    let progress = step_db::get_step_progress(pool, job_id).await?;
    println!("Progress: {}/{} completed", progress.completed, progress.total);
    println!(
        "  pending={} processing={} completed={} failed={} cancelled={}",
        progress.pending,
        progress.processing,
        progress.completed,
        progress.failed,
        progress.cancelled,
    );
    println!();

    let steps = step_db::list_steps_for_job(pool, job_id).await?;
    println!("Steps:");
    for step in &steps {
        let status_icon = match step.status.to_string().as_str() {
            "pending" => ".",
            "processing" => "*",
            "completed" => "+",
            "failed" => "!",
            "cancelled" => "x",
            _ => " ",
        };
        println!(
            "  [{}] {:>2}. {} ({}, {})",
            status_icon, step.order_index, step.title, step.step_type, step.status
        );
        if let Some(log) = &step.log {
            println!("        {log}");
        }
    }

    let artifacts = artifact_db::list_artifacts_for_job(pool, job_id).await?;
    if !artifacts.is_empty() {
        println!();
        println!("Artifacts:");
        for artifact in &artifacts {
            let assets = artifact.assets.as_array().map_or(0, Vec::len);
            println!(
                "  {} ({}, {} assets)",
                artifact.artifact_type, artifact.status, assets
            );
        }
    }

    Ok(())
}

/// List recent jobs with a one-line summary each.
async fn run_recent_jobs(pool: &PgPool) -> Result<()> {
    let jobs = job_db::list_recent_jobs(pool, 20).await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<24}  {}",
        "JOB", "STATUS", "MODEL", "CREATED"
    );
    for job in &jobs {
        println!(
            "{:<36}  {:<10}  {:<24}  {}",
            job.id,
            job.status.to_string(),
            job.ai_model,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}
