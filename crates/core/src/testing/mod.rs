//! Testing utilities shared by unit and integration tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use exportq_core::testing::fixtures;
//!
//! let batches = fixtures::factory(10)
//!     .build("org-1", &fixtures::provider_info(), &fixtures::patients(25), &fixtures::request_details())
//!     .unwrap();
//! ```

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::net::{IpAddr, Ipv4Addr};

    use chrono::{Duration, Utc};

    use crate::config::QueueConfig;
    use crate::job::{
        Batch, BatchFactory, BatchId, BatchRequestDetails, BatchStatus, GroupProviderInfo, JobId,
        ResourceType,
    };

    /// Provider numbers for a test organization.
    pub fn provider_info() -> GroupProviderInfo {
        GroupProviderInfo::new("1234567893", "1093817467")
    }

    /// `n` distinct patient identifiers.
    pub fn patients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("patient-{:05}", i)).collect()
    }

    /// Valid request details for a single (non-bulk) export of every type.
    pub fn request_details() -> BatchRequestDetails {
        BatchRequestDetails {
            priority: None,
            requesting_ip: "10.0.0.7".to_string(),
            request_url: "/api/v1/Group/all/$export".to_string(),
            resource_types: ResourceType::ALL.to_vec(),
            since: Some(Utc::now() - Duration::days(30)),
            is_bulk: false,
        }
    }

    /// A batch factory with the given chunk size and default priorities.
    pub fn factory(batch_size: usize) -> BatchFactory {
        BatchFactory::new(&QueueConfig {
            batch_size,
            ..QueueConfig::default()
        })
    }

    /// A QUEUED batch of `job_id` holding `patients`, with reasonable defaults.
    pub fn batch(job_id: JobId, patients: Vec<String>) -> Batch {
        let now = Utc::now();
        Batch {
            batch_id: BatchId::new(),
            job_id,
            sequence: 0,
            organization_id: "org-1".to_string(),
            organization_npi: "1234567893".to_string(),
            provider_npi: "1093817467".to_string(),
            patients,
            resource_types: ResourceType::ALL.to_vec(),
            since: None,
            priority: 1000,
            transaction_time: now,
            status: BatchStatus::Queued,
            submit_time: now,
            start_time: None,
            complete_time: None,
            worker_id: None,
            failure_reason: None,
            request_url: "/api/v1/Group/all/$export".to_string(),
            requesting_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
            is_bulk: false,
            output_files: Vec::new(),
        }
    }
}
