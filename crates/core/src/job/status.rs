//! Job status reduction.
//!
//! A job has no stored status of its own. Its visible status is reduced from
//! the statuses of its batches on every read, so a poll never mutates
//! anything and always reflects the batches as they are right now.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Batch, BatchFile, BatchId, BatchStatus, JobId, JobStore, QueueError, ResourceType};
use crate::metrics::STATUS_QUERIES;

/// How a failed batch affects the status of its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed batch fails the whole job.
    #[default]
    FailFast,
    /// Failed batches count as finished. The job completes once every batch
    /// is terminal and at least one succeeded; it fails only if all failed.
    BestEffort,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailFast => "fail_fast",
            FailurePolicy::BestEffort => "best_effort",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of batches in each status.
///
/// Reduction works on counts only, so the result cannot depend on the order
/// the batches were read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = BatchStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            counts.record(status);
        }
        counts
    }

    pub fn record(&mut self, status: BatchStatus) {
        match status {
            BatchStatus::Queued => self.queued += 1,
            BatchStatus::InProgress => self.in_progress += 1,
            BatchStatus::Completed => self.completed += 1,
            BatchStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.in_progress + self.completed + self.failed
    }

    /// Batches in a terminal status.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    /// Share of finished batches, 0 to 100, rounded down.
    pub fn percent_complete(&self) -> u8 {
        match self.total() {
            0 => 0,
            total => (self.finished() * 100 / total) as u8,
        }
    }

    /// Reduce the counts to a job status under `policy`.
    pub fn reduce(&self, policy: FailurePolicy) -> JobStatus {
        let total = self.total();
        if total == 0 {
            return JobStatus::Queued;
        }

        match policy {
            FailurePolicy::FailFast => {
                if self.failed > 0 {
                    JobStatus::Failed
                } else if self.completed == total {
                    JobStatus::Completed
                } else if self.in_progress + self.completed > 0 {
                    JobStatus::InProgress
                } else {
                    JobStatus::Queued
                }
            }
            FailurePolicy::BestEffort => {
                if self.failed == total {
                    JobStatus::Failed
                } else if self.finished() == total {
                    JobStatus::Completed
                } else if self.in_progress + self.finished() > 0 {
                    JobStatus::InProgress
                } else {
                    JobStatus::Queued
                }
            }
        }
    }
}

/// Per-batch detail returned alongside the job status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub sequence: u32,
    pub status: BatchStatus,
    pub patient_count: usize,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Batch> for BatchSummary {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.batch_id,
            sequence: batch.sequence,
            status: batch.status,
            patient_count: batch.patients.len(),
            priority: batch.priority,
            worker_id: batch.worker_id.clone(),
            start_time: batch.start_time,
            complete_time: batch.complete_time,
            failure_reason: batch.failure_reason.clone(),
        }
    }
}

/// Export progress for one resource type across the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProgress {
    pub resource_type: ResourceType,
    /// Batches that requested this type.
    pub batches_total: usize,
    /// Of those, batches that completed.
    pub batches_completed: usize,
    /// Records written across all output files.
    pub record_count: u64,
    pub files: Vec<BatchFile>,
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub failure_policy: FailurePolicy,
    pub organization_id: String,
    pub request_url: String,
    pub transaction_time: DateTime<Utc>,
    pub submit_time: DateTime<Utc>,
    /// Earliest batch start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Latest batch completion, once the job is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    pub counts: StatusCounts,
    pub percent_complete: u8,
    pub batches: Vec<BatchSummary>,
    pub resources: Vec<ResourceProgress>,
}

impl JobStatusReport {
    /// Build the report for `job_id` from its batches, in any order.
    pub fn from_batches(
        job_id: JobId,
        batches: &[Batch],
        policy: FailurePolicy,
    ) -> Result<Self, QueueError> {
        let mut ordered: Vec<&Batch> = batches.iter().collect();
        ordered.sort_by_key(|b| (b.sequence, b.batch_id));

        let first = ordered
            .first()
            .ok_or_else(|| QueueError::NotFound(format!("job {}", job_id)))?;

        if let Some(stray) = ordered.iter().find(|b| b.job_id != job_id) {
            return Err(QueueError::PersistenceFailure(format!(
                "batch {} read for job {} belongs to job {}",
                stray.batch_id, job_id, stray.job_id
            )));
        }

        let counts = StatusCounts::tally(ordered.iter().map(|b| b.status));
        let status = counts.reduce(policy);

        let start_time = ordered.iter().filter_map(|b| b.start_time).min();
        let complete_time = if status.is_terminal() {
            ordered.iter().filter_map(|b| b.complete_time).max()
        } else {
            None
        };

        Ok(Self {
            job_id,
            status,
            failure_policy: policy,
            organization_id: first.organization_id.clone(),
            request_url: first.request_url.clone(),
            transaction_time: first.transaction_time,
            submit_time: ordered.iter().map(|b| b.submit_time).min().unwrap_or(first.submit_time),
            start_time,
            complete_time,
            counts,
            percent_complete: counts.percent_complete(),
            batches: ordered.iter().map(|b| BatchSummary::from(*b)).collect(),
            resources: resource_progress(&ordered),
        })
    }

    /// Output files of every completed batch, in batch order.
    pub fn output_files(&self) -> impl Iterator<Item = &BatchFile> {
        self.resources.iter().flat_map(|r| r.files.iter())
    }

    /// Failure reasons of failed batches, in batch order.
    pub fn failures(&self) -> impl Iterator<Item = (&BatchId, &str)> {
        self.batches.iter().filter_map(|b| match (&b.status, &b.failure_reason) {
            (BatchStatus::Failed, Some(reason)) => Some((&b.batch_id, reason.as_str())),
            (BatchStatus::Failed, None) => Some((&b.batch_id, "batch failed")),
            _ => None,
        })
    }
}

fn resource_progress(ordered: &[&Batch]) -> Vec<ResourceProgress> {
    ResourceType::ALL
        .into_iter()
        .filter_map(|resource_type| {
            let requesting: Vec<&&Batch> = ordered
                .iter()
                .filter(|b| b.resource_types.contains(&resource_type))
                .collect();
            if requesting.is_empty() {
                return None;
            }

            let mut files: Vec<BatchFile> = Vec::new();
            let mut batches_completed = 0;
            for batch in &requesting {
                if batch.status != BatchStatus::Completed {
                    continue;
                }
                batches_completed += 1;
                let mut batch_files: Vec<&BatchFile> = batch
                    .output_files
                    .iter()
                    .filter(|f| f.resource_type == resource_type)
                    .collect();
                batch_files.sort_by_key(|f| f.sequence);
                files.extend(batch_files.into_iter().cloned());
            }

            Some(ResourceProgress {
                resource_type,
                batches_total: requesting.len(),
                batches_completed,
                record_count: files.iter().map(|f| f.count).sum(),
                files,
            })
        })
        .collect()
}

/// Read-only service answering job status queries.
pub struct JobStatusAggregator {
    store: Arc<dyn JobStore>,
    policy: FailurePolicy,
}

impl JobStatusAggregator {
    pub fn new(store: Arc<dyn JobStore>, policy: FailurePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Current status of a job. Unknown jobs are `NotFound`; read errors are
    /// returned as-is and never replaced by a default status.
    pub fn status(&self, job_id: &JobId) -> Result<JobStatusReport, QueueError> {
        let batches = self.store.batches_for_job(job_id).map_err(|e| {
            error!(job_id = %job_id, error = %e, "Failed to read job batches");
            e
        })?;

        let report = JobStatusReport::from_batches(*job_id, &batches, self.policy)?;

        STATUS_QUERIES
            .with_label_values(&[report.status.as_str()])
            .inc();
        debug!(
            job_id = %job_id,
            status = %report.status,
            finished = report.counts.finished(),
            total = report.counts.total(),
            "Computed job status"
        );

        Ok(report)
    }
}
