pub mod config;
pub mod job;
pub mod metrics;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    QueueConfig, ServerConfig,
};
pub use job::{
    Batch, BatchFactory, BatchFile, BatchId, BatchRequestDetails, BatchStatus, CreatedJob,
    FailurePolicy, GroupProviderInfo, JobId, JobRepository, JobStatus, JobStatusAggregator,
    JobStatusReport, JobStore, QueueError, ResourceType, SqliteJobStore,
};
