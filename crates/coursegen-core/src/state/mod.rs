//! Job and step state machine transitions.
//!
//! Validates and executes status transitions, enforcing the allowed
//! transition graph, optimistic locking, and timestamp management.

use anyhow::{Result, bail};
use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use coursegen_db::models::{JobStatus, StepStatus};
use coursegen_db::queries::jobs as job_db;
use coursegen_db::queries::steps as step_db;

/// The job state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// queued     -> processing
/// processing -> completed
/// processing -> failed
/// queued     -> cancelled
/// processing -> cancelled
/// ```
///
/// Transitions are monotonic except for cancellation, which is reachable
/// from any non-terminal status.
pub struct JobStateMachine;

impl JobStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// - Validates the transition is legal.
    /// - Sets `started_at` when transitioning `queued -> processing`.
    /// - Sets `completed_at` when transitioning to a terminal status.
    ///
    /// Takes a connection so the worker can run it inside the transaction
    /// holding the job row lock.
    ///
    /// Returns an error if the transition is not valid, the current status
    /// in the database does not match `from` (optimistic lock failure), or
    /// the job does not exist.
    pub async fn transition(
        conn: &mut PgConnection,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for job {}",
                from,
                to,
                job_id
            );
        }

        let started_at = if from == JobStatus::Queued && to == JobStatus::Processing {
            Some(Utc::now())
        } else {
            None
        };

        let completed_at = if to.is_terminal() { Some(Utc::now()) } else { None };

        let rows =
            job_db::transition_job_status(&mut *conn, job_id, from, to, started_at, completed_at)
                .await?;

        if rows == 0 {
            // Either the job does not exist or the status did not match.
            let job = job_db::get_job(&mut *conn, job_id).await?;
            match job {
                None => bail!("job {} not found", job_id),
                Some(j) => bail!(
                    "optimistic lock failed: job {} has status {}, expected {}",
                    job_id,
                    j.status,
                    from
                ),
            }
        }

        Ok(())
    }
}

/// The step state machine.
///
/// ```text
/// pending    -> processing
/// processing -> completed
/// processing -> failed
/// pending    -> cancelled
/// processing -> cancelled
/// ```
pub struct StepStateMachine;

impl StepStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: StepStatus, to: StepStatus) -> bool {
        matches!(
            (from, to),
            (StepStatus::Pending, StepStatus::Processing)
                | (StepStatus::Processing, StepStatus::Completed)
                | (StepStatus::Processing, StepStatus::Failed)
                | (StepStatus::Pending, StepStatus::Cancelled)
                | (StepStatus::Processing, StepStatus::Cancelled)
        )
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// Timestamp rules mirror [`JobStateMachine::transition`]: `started_at`
    /// on entry to processing, `completed_at` on entry to any terminal
    /// status.
    pub async fn transition(
        conn: &mut PgConnection,
        step_id: Uuid,
        from: StepStatus,
        to: StepStatus,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for step {}",
                from,
                to,
                step_id
            );
        }

        let started_at = if to == StepStatus::Processing {
            Some(Utc::now())
        } else {
            None
        };

        let completed_at = match to {
            StepStatus::Completed | StepStatus::Failed | StepStatus::Cancelled => Some(Utc::now()),
            _ => None,
        };

        let rows = step_db::transition_step_status(
            &mut *conn,
            step_id,
            from,
            to,
            started_at,
            completed_at,
        )
        .await?;

        if rows == 0 {
            let step = step_db::get_step(&mut *conn, step_id).await?;
            match step {
                None => bail!("step {} not found", step_id),
                Some(s) => bail!(
                    "optimistic lock failed: step {} has status {}, expected {}",
                    step_id,
                    s.status,
                    from
                ),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_forward_edges_are_valid() {
        assert!(JobStateMachine::is_valid_transition(
            JobStatus::Queued,
            JobStatus::Processing
        ));
        assert!(JobStateMachine::is_valid_transition(
            JobStatus::Processing,
            JobStatus::Completed
        ));
        assert!(JobStateMachine::is_valid_transition(
            JobStatus::Processing,
            JobStatus::Failed
        ));
    }

    #[test]
    fn job_cancellation_from_any_non_terminal() {
        assert!(JobStateMachine::is_valid_transition(
            JobStatus::Queued,
            JobStatus::Cancelled
        ));
        assert!(JobStateMachine::is_valid_transition(
            JobStatus::Processing,
            JobStatus::Cancelled
        ));
    }

    #[test]
    fn job_terminal_states_never_move() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in [
                JobStatus::Queued,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(
                    !JobStateMachine::is_valid_transition(terminal, to),
                    "{terminal} -> {to} should be invalid"
                );
            }
        }
    }

    #[test]
    fn job_cannot_skip_processing() {
        assert!(!JobStateMachine::is_valid_transition(
            JobStatus::Queued,
            JobStatus::Completed
        ));
        assert!(!JobStateMachine::is_valid_transition(
            JobStatus::Queued,
            JobStatus::Failed
        ));
    }

    #[test]
    fn step_forward_edges_are_valid() {
        assert!(StepStateMachine::is_valid_transition(
            StepStatus::Pending,
            StepStatus::Processing
        ));
        assert!(StepStateMachine::is_valid_transition(
            StepStatus::Processing,
            StepStatus::Completed
        ));
        assert!(StepStateMachine::is_valid_transition(
            StepStatus::Processing,
            StepStatus::Failed
        ));
    }

    #[test]
    fn step_cancellation_from_any_non_terminal() {
        assert!(StepStateMachine::is_valid_transition(
            StepStatus::Pending,
            StepStatus::Cancelled
        ));
        assert!(StepStateMachine::is_valid_transition(
            StepStatus::Processing,
            StepStatus::Cancelled
        ));
    }

    #[test]
    fn step_terminal_states_never_move() {
        for terminal in [
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Cancelled,
        ] {
            for to in [
                StepStatus::Pending,
                StepStatus::Processing,
                StepStatus::Completed,
                StepStatus::Failed,
                StepStatus::Cancelled,
            ] {
                assert!(
                    !StepStateMachine::is_valid_transition(terminal, to),
                    "{terminal} -> {to} should be invalid"
                );
            }
        }
    }
}
