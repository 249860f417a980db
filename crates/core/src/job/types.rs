//! Core job and batch data types.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::QueueError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier shared by every batch created from one export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| QueueError::InvalidRequest(format!("malformed job id: {}", s)))
    }
}

/// Identifier of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BatchId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| QueueError::InvalidRequest(format!("malformed batch id: {}", s)))
    }
}

// ============================================================================
// Resource Types
// ============================================================================

/// Clinical record categories that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Coverage,
    ExplanationOfBenefit,
}

impl ResourceType {
    /// Every exportable resource type, in export order.
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Patient,
        ResourceType::Coverage,
        ResourceType::ExplanationOfBenefit,
    ];

    /// The resource name as it appears in requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Coverage => "Coverage",
            ResourceType::ExplanationOfBenefit => "ExplanationOfBenefit",
        }
    }

    /// Lowercase path segment, used as the output file extension.
    pub fn path(&self) -> &'static str {
        match self {
            ResourceType::Patient => "patient",
            ResourceType::Coverage => "coverage",
            ResourceType::ExplanationOfBenefit => "explanationofbenefit",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s.trim())
            .ok_or_else(|| QueueError::InvalidRequest(format!("unsupported resource type: {}", s)))
    }
}

// ============================================================================
// Batch Status
// ============================================================================

/// Status of a single batch.
///
/// `QUEUED -> IN_PROGRESS -> {COMPLETED, FAILED}`. Workers drive every
/// transition after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 4] = [
        BatchStatus::Queued,
        BatchStatus::InProgress,
        BatchStatus::Completed,
        BatchStatus::Failed,
    ];

    /// Column value used by the storage layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "QUEUED",
            BatchStatus::InProgress => "IN_PROGRESS",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Returns true if `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Queued, BatchStatus::InProgress)
                | (BatchStatus::InProgress, BatchStatus::Completed)
                | (BatchStatus::InProgress, BatchStatus::Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BatchStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::InvalidRequest(format!("unknown batch status: {}", s)))
    }
}

// ============================================================================
// Request Inputs
// ============================================================================

/// Provider numbers registered for a group, supplied by the membership lookup.
///
/// Copied by value into every batch so later organization changes do not
/// alter in-flight work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProviderInfo {
    pub organization_npi: String,
    pub provider_npi: String,
}

impl GroupProviderInfo {
    pub fn new(organization_npi: impl Into<String>, provider_npi: impl Into<String>) -> Self {
        Self {
            organization_npi: organization_npi.into(),
            provider_npi: provider_npi.into(),
        }
    }
}

/// Request details supplied by the export controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestDetails {
    /// Explicit priority. `None` picks the configured default for the
    /// request kind (bulk or single).
    #[serde(default)]
    pub priority: Option<i32>,
    /// Address of the caller, as text. Must parse as an IP address.
    pub requesting_ip: String,
    /// URL the export was requested with.
    pub request_url: String,
    /// Resource types to export.
    pub resource_types: Vec<ResourceType>,
    /// Only records changed after this instant are exported.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Whether the request is a full-group export.
    #[serde(default)]
    pub is_bulk: bool,
}

// ============================================================================
// Batch
// ============================================================================

/// Output file written by a worker for one resource type of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub resource_type: ResourceType,
    /// Index of the file among the batch's files of this resource type.
    pub sequence: u32,
    pub file_name: String,
    /// Number of records in the file.
    pub count: u64,
}

impl BatchFile {
    /// Build a file reference with the canonical name
    /// `{batch_id}-{sequence}.{resource path}`.
    pub fn new(batch_id: &BatchId, resource_type: ResourceType, sequence: u32, count: u64) -> Self {
        Self {
            resource_type,
            sequence,
            file_name: Self::output_file_name(batch_id, resource_type, sequence),
            count,
        }
    }

    pub fn output_file_name(batch_id: &BatchId, resource_type: ResourceType, sequence: u32) -> String {
        format!("{}-{}.{}", batch_id, sequence, resource_type.path())
    }
}

/// The schedulable unit of work. One job decomposes into one or more batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub job_id: JobId,
    /// Position of this chunk within its job.
    pub sequence: u32,

    pub organization_id: String,
    pub organization_npi: String,
    pub provider_npi: String,

    /// Patients this batch exports, in request order.
    pub patients: Vec<String>,
    pub resource_types: Vec<ResourceType>,
    pub since: Option<DateTime<Utc>>,

    /// Lower values are claimed first.
    pub priority: i32,
    /// Point-in-time all batches of the job are answered against.
    pub transaction_time: DateTime<Utc>,

    pub status: BatchStatus,
    pub submit_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    /// Worker that claimed the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub request_url: String,
    pub requesting_ip: IpAddr,
    pub is_bulk: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<BatchFile>,
}

impl Batch {
    /// Key workers claim by: priority, then submit time, then batch id.
    pub fn claim_key(&self) -> (i32, DateTime<Utc>, BatchId) {
        (self.priority, self.submit_time, self.batch_id)
    }

    /// Returns true if the timestamps present agree with the status.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            BatchStatus::Queued => self.start_time.is_none() && self.complete_time.is_none(),
            BatchStatus::InProgress => self.start_time.is_some() && self.complete_time.is_none(),
            BatchStatus::Completed | BatchStatus::Failed => {
                self.start_time.is_some() && self.complete_time.is_some()
            }
        }
    }
}

/// Pick the batch a worker should claim next from a set of candidates.
///
/// Only QUEUED batches are eligible. Ordering matches the storage claim
/// protocol so the result does not depend on the order of `batches`.
pub fn next_to_claim(batches: &[Batch]) -> Option<&Batch> {
    batches
        .iter()
        .filter(|b| b.status == BatchStatus::Queued)
        .min_by_key(|b| b.claim_key())
}

/// Result of creating a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedJob {
    pub job_id: JobId,
    /// Identifiers of the persisted batches, in chunk order.
    pub batch_ids: Vec<BatchId>,
}
