//! Database query functions for the `artifacts` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Artifact, ArtifactType};

/// Ensure a draft artifact row exists for (job, artifact_type).
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent: the row is created
/// before any step writes to it, and re-running is harmless.
pub async fn ensure_artifact(
    pool: &PgPool,
    job_id: Uuid,
    artifact_type: ArtifactType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO artifacts (job_id, artifact_type) VALUES ($1, $2) \
         ON CONFLICT (job_id, artifact_type) DO NOTHING",
    )
    .bind(job_id)
    .bind(artifact_type)
    .execute(pool)
    .await
    .context("failed to ensure artifact")?;

    Ok(())
}

/// Fetch the artifact for (job, artifact_type).
pub async fn get_artifact(
    pool: &PgPool,
    job_id: Uuid,
    artifact_type: ArtifactType,
) -> Result<Option<Artifact>> {
    let artifact = sqlx::query_as::<_, Artifact>(
        "SELECT * FROM artifacts WHERE job_id = $1 AND artifact_type = $2",
    )
    .bind(job_id)
    .bind(artifact_type)
    .fetch_optional(pool)
    .await
    .context("failed to fetch artifact")?;

    Ok(artifact)
}

/// List all artifacts for a job, in canonical type order.
pub async fn list_artifacts_for_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<Artifact>> {
    let artifacts = sqlx::query_as::<_, Artifact>(
        "SELECT * FROM artifacts WHERE job_id = $1 ORDER BY artifact_type ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .context("failed to list artifacts for job")?;

    Ok(artifacts)
}

/// Merge a step's mutations into an artifact row.
///
/// - `content_text` / `content_json`: replace only when provided.
/// - `new_assets`: appended to the JSONB `assets` array.
/// - `mark_completed`: flips status from draft to completed.
///
/// Returns the number of rows affected (0 means the artifact row is
/// missing, which violates the row-exists-before-write invariant).
pub async fn apply_artifact_update(
    pool: &PgPool,
    job_id: Uuid,
    artifact_type: ArtifactType,
    content_text: Option<&str>,
    content_json: Option<&serde_json::Value>,
    new_assets: &[serde_json::Value],
    mark_completed: bool,
) -> Result<u64> {
    let assets_json = serde_json::Value::Array(new_assets.to_vec());

    let result = sqlx::query(
        "UPDATE artifacts \
         SET content_text = COALESCE($1, content_text), \
             content_json = COALESCE($2, content_json), \
             assets = assets || $3, \
             status = CASE WHEN $4 THEN 'completed' ELSE status END, \
             updated_at = NOW() \
         WHERE job_id = $5 AND artifact_type = $6",
    )
    .bind(content_text)
    .bind(content_json)
    .bind(assets_json)
    .bind(mark_completed)
    .bind(job_id)
    .bind(artifact_type)
    .execute(pool)
    .await
    .context("failed to apply artifact update")?;

    Ok(result.rows_affected())
}

/// List the artifact types for a job that have reached completed status.
pub async fn completed_artifact_types(pool: &PgPool, job_id: Uuid) -> Result<Vec<ArtifactType>> {
    let rows: Vec<(ArtifactType,)> = sqlx::query_as(
        "SELECT artifact_type FROM artifacts \
         WHERE job_id = $1 AND status = 'completed' \
         ORDER BY artifact_type ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .context("failed to list completed artifact types")?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}
