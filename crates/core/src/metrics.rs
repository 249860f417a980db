//! Prometheus metrics for the export queue.
//!
//! This module provides metrics for:
//! - Job creation (jobs, batches, failures, latency)
//! - Batch lifecycle (claims and terminal transitions)
//! - Status queries

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Job Creation Metrics
// =============================================================================

/// Jobs created by request kind.
pub static JOBS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exportq_jobs_created_total", "Total export jobs created"),
        &["kind"], // "bulk", "single"
    )
    .unwrap()
});

/// Batches created across all jobs.
pub static BATCHES_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("exportq_batches_created_total", "Total batches created").unwrap()
});

/// Failed job creations by error kind.
pub static JOB_CREATE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "exportq_job_create_failures_total",
            "Total failed job creations",
        ),
        &["kind"], // QueueError::kind()
    )
    .unwrap()
});

/// Time spent persisting a job's batches.
pub static JOB_CREATE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "exportq_job_create_duration_seconds",
            "Duration of the job creation transaction",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["result"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Batch Lifecycle Metrics
// =============================================================================

/// Batch status transitions by target status.
pub static BATCH_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "exportq_batch_transitions_total",
            "Total batch status transitions",
        ),
        &["status"], // "IN_PROGRESS", "COMPLETED", "FAILED"
    )
    .unwrap()
});

// =============================================================================
// Status Query Metrics
// =============================================================================

/// Status queries answered, by reported job status.
pub static STATUS_QUERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exportq_status_queries_total", "Total job status queries"),
        &["status"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Creation
        Box::new(JOBS_CREATED.clone()),
        Box::new(BATCHES_CREATED.clone()),
        Box::new(JOB_CREATE_FAILURES.clone()),
        Box::new(JOB_CREATE_DURATION.clone()),
        // Lifecycle
        Box::new(BATCH_TRANSITIONS.clone()),
        // Queries
        Box::new(STATUS_QUERIES.clone()),
    ]
}
