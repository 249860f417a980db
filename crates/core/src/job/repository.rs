//! Job creation service.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::{
    Batch, BatchFactory, BatchRequestDetails, CreatedJob, GroupProviderInfo, JobStore, QueueError,
};
use crate::config::QueueConfig;
use crate::metrics::{BATCHES_CREATED, JOBS_CREATED, JOB_CREATE_DURATION, JOB_CREATE_FAILURES};

/// Creates jobs: builds their batches and persists them atomically.
///
/// Construction and persistence are separate steps so callers can validate a
/// request before committing to a transaction.
pub struct JobRepository {
    store: Arc<dyn JobStore>,
    factory: BatchFactory,
}

impl JobRepository {
    pub fn new(store: Arc<dyn JobStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            factory: BatchFactory::new(config),
        }
    }

    /// Build the batches of a new job without touching storage.
    pub fn new_batches(
        &self,
        organization_id: &str,
        provider: &GroupProviderInfo,
        patients: &[String],
        details: &BatchRequestDetails,
    ) -> Result<Vec<Batch>, QueueError> {
        self.factory
            .build(organization_id, provider, patients, details)
            .map_err(|e| {
                warn!(organization_id, error = %e, "Rejected export request");
                record_failure(&e);
                e
            })
    }

    /// Persist every batch of one job in a single transaction.
    pub fn insert(&self, batches: &[Batch]) -> Result<CreatedJob, QueueError> {
        let start = Instant::now();
        let result = self.store.insert_batches(batches);
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(created) => {
                let is_bulk = batches.first().map(|b| b.is_bulk).unwrap_or(false);
                JOBS_CREATED
                    .with_label_values(&[if is_bulk { "bulk" } else { "single" }])
                    .inc();
                BATCHES_CREATED.inc_by(created.batch_ids.len() as u64);
                JOB_CREATE_DURATION
                    .with_label_values(&["success"])
                    .observe(elapsed);
                info!(
                    job_id = %created.job_id,
                    batches = created.batch_ids.len(),
                    patients = batches.iter().map(|b| b.patients.len()).sum::<usize>(),
                    is_bulk,
                    "Created export job"
                );
            }
            Err(e) => {
                JOB_CREATE_DURATION
                    .with_label_values(&["failure"])
                    .observe(elapsed);
                record_failure(e);
                if e.is_retryable() {
                    error!(error = %e, batches = batches.len(), "Failed to persist export job, safe to retry");
                } else {
                    warn!(error = %e, batches = batches.len(), "Export job rejected by storage");
                }
            }
        }

        result
    }

    /// Build and persist a new job.
    pub fn create_job(
        &self,
        organization_id: &str,
        provider: &GroupProviderInfo,
        patients: &[String],
        details: &BatchRequestDetails,
    ) -> Result<CreatedJob, QueueError> {
        let batches = self.new_batches(organization_id, provider, patients, details)?;
        self.insert(&batches)
    }
}

fn record_failure(e: &QueueError) {
    JOB_CREATE_FAILURES.with_label_values(&[e.kind()]).inc();
}
