//! Pure construction of batches from an export request.
//!
//! The factory performs no I/O. Given the same inputs it produces the same
//! chunking; only the generated identifiers and timestamps differ.

use std::collections::HashSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{
    Batch, BatchId, BatchRequestDetails, BatchStatus, GroupProviderInfo, JobId, QueueError,
    ResourceType,
};
use crate::config::QueueConfig;

/// Builds the batches of one job, applying the chunking policy.
#[derive(Debug, Clone)]
pub struct BatchFactory {
    batch_size: usize,
    bulk_priority: i32,
    single_priority: i32,
}

/// Values shared by every batch of one job.
struct JobContext<'a> {
    job_id: JobId,
    organization_id: &'a str,
    provider: &'a GroupProviderInfo,
    resource_types: Vec<ResourceType>,
    priority: i32,
    requesting_ip: IpAddr,
    now: DateTime<Utc>,
}

impl BatchFactory {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            bulk_priority: config.bulk_priority,
            single_priority: config.single_priority,
        }
    }

    /// Split one export request into batches sharing a fresh job ID.
    ///
    /// Patients are partitioned into contiguous chunks of `batch_size`; the
    /// last chunk holds the remainder.
    pub fn build(
        &self,
        organization_id: &str,
        provider: &GroupProviderInfo,
        patients: &[String],
        details: &BatchRequestDetails,
    ) -> Result<Vec<Batch>, QueueError> {
        let now = Utc::now();
        let ctx = self.validate(organization_id, provider, details, now)?;
        let patients = distinct_patients(patients)?;

        let batches: Vec<Batch> = patients
            .chunks(self.batch_size)
            .enumerate()
            .map(|(sequence, chunk)| Self::new_batch(&ctx, details, sequence as u32, chunk.to_vec()))
            .collect();

        debug!(
            job_id = %ctx.job_id,
            patients = patients.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "Chunked export request"
        );

        Ok(batches)
    }

    fn validate<'a>(
        &self,
        organization_id: &'a str,
        provider: &'a GroupProviderInfo,
        details: &BatchRequestDetails,
        now: DateTime<Utc>,
    ) -> Result<JobContext<'a>, QueueError> {
        require_non_blank("organization id", organization_id)?;
        require_non_blank("organization NPI", &provider.organization_npi)?;
        require_non_blank("provider NPI", &provider.provider_npi)?;
        require_non_blank("request URL", &details.request_url)?;

        let requesting_ip: IpAddr = details.requesting_ip.trim().parse().map_err(|_| {
            QueueError::InvalidRequest(format!(
                "requesting IP is not an IP address: {:?}",
                details.requesting_ip
            ))
        })?;

        let mut resource_types = Vec::with_capacity(details.resource_types.len());
        for rt in &details.resource_types {
            if !resource_types.contains(rt) {
                resource_types.push(*rt);
            }
        }
        if resource_types.is_empty() {
            return Err(QueueError::InvalidRequest(
                "at least one resource type is required".to_string(),
            ));
        }

        if let Some(since) = details.since {
            if since > now {
                return Err(QueueError::InvalidRequest(format!(
                    "since cannot be in the future: {}",
                    since.to_rfc3339()
                )));
            }
        }

        let priority = details.priority.unwrap_or(if details.is_bulk {
            self.bulk_priority
        } else {
            self.single_priority
        });

        Ok(JobContext {
            job_id: JobId::new(),
            organization_id,
            provider,
            resource_types,
            priority,
            requesting_ip,
            now,
        })
    }

    fn new_batch(
        ctx: &JobContext<'_>,
        details: &BatchRequestDetails,
        sequence: u32,
        patients: Vec<String>,
    ) -> Batch {
        Batch {
            batch_id: BatchId::new(),
            job_id: ctx.job_id,
            sequence,
            organization_id: ctx.organization_id.trim().to_string(),
            organization_npi: ctx.provider.organization_npi.clone(),
            provider_npi: ctx.provider.provider_npi.clone(),
            patients,
            resource_types: ctx.resource_types.clone(),
            since: details.since,
            priority: ctx.priority,
            transaction_time: ctx.now,
            status: BatchStatus::Queued,
            submit_time: ctx.now,
            start_time: None,
            complete_time: None,
            worker_id: None,
            failure_reason: None,
            request_url: details.request_url.trim().to_string(),
            requesting_ip: ctx.requesting_ip,
            is_bulk: details.is_bulk,
            output_files: Vec::new(),
        }
    }
}

fn require_non_blank(field: &str, value: &str) -> Result<(), QueueError> {
    if value.trim().is_empty() {
        return Err(QueueError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}

/// Trim and de-duplicate patient identifiers, keeping first occurrence.
fn distinct_patients(patients: &[String]) -> Result<Vec<String>, QueueError> {
    if patients.is_empty() {
        return Err(QueueError::InvalidRequest(
            "at least one patient is required".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(patients.len());
    let mut distinct = Vec::with_capacity(patients.len());
    for (idx, patient) in patients.iter().enumerate() {
        let patient = patient.trim();
        if patient.is_empty() {
            return Err(QueueError::InvalidRequest(format!(
                "patient identifier at position {} is blank",
                idx
            )));
        }
        if seen.insert(patient) {
            distinct.push(patient.to_string());
        }
    }

    Ok(distinct)
}
