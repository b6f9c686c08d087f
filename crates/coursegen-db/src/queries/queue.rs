//! The storage queue carrying `{job_id}` messages between HTTP triggers and
//! the worker.
//!
//! Dequeue claims the oldest message with `FOR UPDATE SKIP LOCKED` and
//! deletes it in the same statement. Callers run it on an open transaction:
//! if the transaction rolls back (worker crash mid-step), the delete is
//! undone and the message is redelivered -- at-least-once semantics.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::QueueMessage;

/// Enqueue a `{job_id}` message.
///
/// Generic over the executor so it can run on a pool or inside the
/// transaction that created the job.
pub async fn enqueue_job<'e, E>(executor: E, job_id: Uuid) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("INSERT INTO queue_messages (job_id) VALUES ($1)")
        .bind(job_id)
        .execute(executor)
        .await
        .context("failed to enqueue job message")?;

    Ok(())
}

/// Claim and delete the oldest queue message.
///
/// Must be called on an open transaction; the deletion only becomes
/// permanent on commit. `SKIP LOCKED` lets concurrent workers claim
/// different messages without blocking on each other.
pub async fn dequeue_job(conn: &mut PgConnection) -> Result<Option<QueueMessage>> {
    let message = sqlx::query_as::<_, QueueMessage>(
        "DELETE FROM queue_messages \
         WHERE id = ( \
             SELECT id FROM queue_messages \
             ORDER BY id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING *",
    )
    .fetch_optional(conn)
    .await
    .context("failed to dequeue job message")?;

    Ok(message)
}

/// Number of messages currently waiting in the queue.
pub async fn queue_depth(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_messages")
        .fetch_one(pool)
        .await
        .context("failed to count queue messages")?;

    Ok(row.0)
}
