//! Export job API handlers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, OriginalUri, Path, State},
    http::{header, Extensions, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use exportq_core::{
    BatchId, BatchRequestDetails, GroupProviderInfo, JobId, JobStatus, JobStatusReport,
    QueueError, ResourceType,
};

use crate::state::AppState;

/// Proxy header naming the original client.
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Header carrying progress of a running job.
const X_PROGRESS: &str = "x-progress";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting an export
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub organization_id: String,
    pub organization_npi: String,
    pub provider_npi: String,
    /// Patients to export
    pub patients: Vec<String>,
    /// Resource type names; every exportable type when omitted
    #[serde(default)]
    pub resource_types: Vec<String>,
    /// Only export records changed after this instant
    pub since: Option<DateTime<Utc>>,
    /// Explicit priority (lower = sooner)
    pub priority: Option<i32>,
    #[serde(default)]
    pub is_bulk: bool,
}

/// Response for a created job
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub batch_ids: Vec<BatchId>,
}

/// One output file of a completed job
#[derive(Debug, Serialize)]
pub struct OutputEntry {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub url: String,
    pub count: u64,
}

/// One failed batch of a completed job
#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub batch_id: BatchId,
    pub reason: String,
}

/// Body returned once a job has completed
#[derive(Debug, Serialize)]
pub struct CompletedJobResponse {
    pub transaction_time: DateTime<Utc>,
    pub request: String,
    pub output: Vec<OutputEntry>,
    pub error: Vec<ErrorEntry>,
}

impl From<&JobStatusReport> for CompletedJobResponse {
    fn from(report: &JobStatusReport) -> Self {
        Self {
            transaction_time: report.transaction_time,
            request: report.request_url.clone(),
            output: report
                .output_files()
                .map(|file| OutputEntry {
                    resource_type: file.resource_type,
                    url: format!("/data/{}/{}", report.job_id, file.file_name),
                    count: file.count,
                })
                .collect(),
            error: report
                .failures()
                .map(|(batch_id, reason)| ErrorEntry {
                    batch_id: *batch_id,
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn error_response(e: QueueError) -> ApiError {
    let status = match &e {
        QueueError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::ConstraintViolation(_) | QueueError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        QueueError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(JobErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Start an export job
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    extensions: Extensions,
    body: Result<Json<CreateJobBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Malformed export request body");
        error_response(QueueError::InvalidRequest(rejection.body_text()))
    })?;
    let resource_types = parse_resource_types(&body.resource_types).map_err(error_response)?;
    let requesting_ip = requesting_ip(&headers, &extensions).ok_or_else(|| {
        warn!("Export request without a resolvable client address");
        error_response(QueueError::InvalidRequest(
            "cannot determine requesting IP".to_string(),
        ))
    })?;

    let details = BatchRequestDetails {
        priority: body.priority,
        requesting_ip,
        request_url: uri.to_string(),
        resource_types,
        since: body.since,
        is_bulk: body.is_bulk,
    };
    let provider = GroupProviderInfo::new(body.organization_npi, body.provider_npi);

    let created = state
        .repository()
        .create_job(&body.organization_id, &provider, &body.patients, &details)
        .map_err(error_response)?;

    let location = format!("/api/v1/jobs/{}", created.job_id);
    Ok((
        StatusCode::ACCEPTED,
        [(header::CONTENT_LOCATION, location)],
        Json(CreateJobResponse {
            job_id: created.job_id,
            batch_ids: created.batch_ids,
        }),
    )
        .into_response())
}

/// Poll an export job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id: JobId = id.parse().map_err(error_response)?;
    let report = state.aggregator().status(&job_id).map_err(error_response)?;

    let response = match report.status {
        JobStatus::Queued | JobStatus::InProgress => {
            let progress = format!("{} ({}%)", report.status, report.percent_complete);
            let mut response = (StatusCode::ACCEPTED, Json(&report)).into_response();
            if let Ok(value) = HeaderValue::from_str(&progress) {
                response.headers_mut().insert(X_PROGRESS, value);
            }
            response
        }
        JobStatus::Completed => {
            (StatusCode::OK, Json(CompletedJobResponse::from(&report))).into_response()
        }
        JobStatus::Failed => (StatusCode::INTERNAL_SERVER_ERROR, Json(&report)).into_response(),
    };

    Ok(response)
}

/// Resource types named in a request; every exportable type when none are.
fn parse_resource_types(names: &[String]) -> Result<Vec<ResourceType>, QueueError> {
    if names.is_empty() {
        return Ok(ResourceType::ALL.to_vec());
    }
    names.iter().map(|name| name.parse()).collect()
}

/// First `X-Forwarded-For` entry when it is an address, else the socket peer.
fn requesting_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());

    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string()),
    }
}
