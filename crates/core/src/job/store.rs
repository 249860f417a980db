//! Job storage trait and error type.

use thiserror::Error;

use super::{Batch, BatchFile, BatchId, BatchStatus, CreatedJob, JobId};

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Caller supplied an unusable request. Not retryable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transient storage or transport error. Safe to retry with backoff.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Identifier collision or referential-integrity failure. Not retryable
    /// without regenerating identifiers.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Unknown job or batch.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A worker attempted a status change the state machine does not allow.
    #[error("Cannot move batch {batch_id} from {from} to {to}")]
    InvalidTransition {
        batch_id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
    },
}

impl QueueError {
    /// Returns true if the caller may resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::PersistenceFailure(_))
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::InvalidRequest(_) => "invalid_request",
            QueueError::PersistenceFailure(_) => "persistence_failure",
            QueueError::ConstraintViolation(_) => "constraint_violation",
            QueueError::NotFound(_) => "not_found",
            QueueError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

/// Check that `batches` is a non-empty set of QUEUED batches of one job.
pub fn validate_new_job(batches: &[Batch]) -> Result<JobId, QueueError> {
    let first = batches
        .first()
        .ok_or_else(|| QueueError::InvalidRequest("a job needs at least one batch".to_string()))?;

    if let Some(stray) = batches.iter().find(|b| b.job_id != first.job_id) {
        return Err(QueueError::InvalidRequest(format!(
            "batch {} belongs to job {}, expected {}",
            stray.batch_id, stray.job_id, first.job_id
        )));
    }

    if let Some(started) = batches.iter().find(|b| b.status != BatchStatus::Queued) {
        return Err(QueueError::InvalidRequest(format!(
            "batch {} is {}, new batches must be QUEUED",
            started.batch_id, started.status
        )));
    }

    Ok(first.job_id)
}

/// Trait for job storage backends.
///
/// Only the job repository writes QUEUED rows; every later status change
/// belongs to workers.
pub trait JobStore: Send + Sync {
    /// Persist every batch of one job in a single transaction.
    /// Either all rows become visible or none do.
    fn insert_batches(&self, batches: &[Batch]) -> Result<CreatedJob, QueueError>;

    /// All batches of a job. Empty if the job is unknown.
    fn batches_for_job(&self, job_id: &JobId) -> Result<Vec<Batch>, QueueError>;

    /// Get a batch by ID.
    fn get_batch(&self, batch_id: &BatchId) -> Result<Option<Batch>, QueueError>;

    /// Atomically claim the next QUEUED batch for `worker_id`.
    /// Returns `None` when nothing is waiting.
    fn claim_next(&self, worker_id: &str) -> Result<Option<Batch>, QueueError>;

    /// Mark a claimed batch as completed and record its output files.
    fn complete_batch(&self, batch_id: &BatchId, files: &[BatchFile]) -> Result<Batch, QueueError>;

    /// Mark a claimed batch as failed.
    fn fail_batch(&self, batch_id: &BatchId, reason: &str) -> Result<Batch, QueueError>;

    /// Number of batches currently in `status`.
    fn count_by_status(&self, status: BatchStatus) -> Result<i64, QueueError>;
}
