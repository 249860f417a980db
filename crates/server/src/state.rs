use std::sync::Arc;

use exportq_core::{Config, JobRepository, JobStatusAggregator, JobStore};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn JobStore>,
    repository: JobRepository,
    aggregator: JobStatusAggregator,
}

impl AppState {
    /// Wire the queue services around one store.
    pub fn new(config: Config, store: Arc<dyn JobStore>) -> Self {
        let repository = JobRepository::new(Arc::clone(&store), &config.queue);
        let aggregator = JobStatusAggregator::new(Arc::clone(&store), config.queue.failure_policy);
        Self {
            config,
            store,
            repository,
            aggregator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repository
    }

    pub fn aggregator(&self) -> &JobStatusAggregator {
        &self.aggregator
    }
}
