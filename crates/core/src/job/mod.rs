//! Export job queue: batch construction, persistence and status reduction.

mod factory;
mod repository;
mod sqlite_store;
mod status;
mod store;
mod types;

pub use factory::BatchFactory;
pub use repository::JobRepository;
pub use sqlite_store::SqliteJobStore;
pub use status::{
    BatchSummary, FailurePolicy, JobStatus, JobStatusAggregator, JobStatusReport,
    ResourceProgress, StatusCounts,
};
pub use store::{validate_new_job, JobStore, QueueError};
pub use types::*;
