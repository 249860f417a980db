//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the router around a real
//! SQLite job store in a temporary directory. Tests play the worker side by
//! driving the store directly.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use exportq_core::{
    Config, DatabaseConfig, FailurePolicy, QueueConfig, ServerConfig, SqliteJobStore,
};

/// Re-export fixtures for test convenience
pub use exportq_core::testing::fixtures;

/// Client address sent in `X-Forwarded-For` by default.
pub const CLIENT_IP: &str = "198.51.100.4";

/// Test fixture for API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_job_creation() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/jobs", json!({
///         "organization_id": "org-1",
///         "organization_npi": "1234567893",
///         "provider_npi": "1093817467",
///         "patients": ["p1"]
///     })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// The job store behind the router, for worker-side actions
    pub store: Arc<SqliteJobStore>,
    /// Temporary directory holding the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestFixture {
    /// Create a new test fixture with default queue settings.
    pub fn new() -> Self {
        Self::with_config(TestConfig::default())
    }

    /// Create a test fixture with custom queue settings.
    pub fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            queue: QueueConfig {
                batch_size: test_config.batch_size,
                failure_policy: test_config.failure_policy,
                ..Default::default()
            },
        };

        let store = Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let state = Arc::new(exportq_server::state::AppState::new(
            config,
            Arc::clone(&store) as Arc<dyn exportq_core::JobStore>,
        ));

        let router = exportq_server::api::create_router(state);

        Self {
            router,
            store,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, Some(CLIENT_IP)).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), Some(CLIENT_IP)).await
    }

    /// Send a POST request without any client address information.
    pub async fn post_anonymous(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    /// Send a POST request with an explicit `X-Forwarded-For` value.
    pub async fn post_forwarded(&self, path: &str, body: Value, forwarded: &str) -> TestResponse {
        self.request("POST", path, Some(body), Some(forwarded)).await
    }

    /// Send a POST request with a raw, possibly malformed, JSON body.
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("X-Forwarded-For", CLIENT_IP)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a GET request and return the raw body text (for non-JSON endpoints).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        client_ip: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        if let Some(ip) = client_ip {
            request_builder = request_builder.header("X-Forwarded-For", ip);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub batch_size: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl TestConfig {
    /// Create config with best-effort failure handling.
    pub fn best_effort() -> Self {
        Self {
            failure_policy: FailurePolicy::BestEffort,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
