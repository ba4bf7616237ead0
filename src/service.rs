//! Device-testing service abstraction.
//!
//! The orchestrator never talks HTTP directly. It issues calls through the
//! [`DeviceService`] trait, which returns the raw status code and the parsed
//! JSON body of each response. Validation of the status and extraction of
//! response fields happens one layer up, in [`crate::client::RemoteClient`].
//!
//! ```text
//! RunVariant / RemoteDeviceTestRun
//!            │
//!            ▼
//!       RemoteClient  ── status checks, field extraction, log sanitizing,
//!            │           results download cache
//!            ▼
//!       DeviceService ── transport only (HttpDeviceService, test doubles)
//! ```
//!
//! Every endpoint is expected to answer with a JSON object whose `response`
//! member carries the payload.

pub mod http;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RunResult;

pub use http::HttpDeviceService;

/// A parsed response from the device service.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, `Value::Null` when the body was empty or not JSON.
    pub body: Value,
}

impl ApiResponse {
    /// Creates a response from a status code and body.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Returns `true` for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `response` member of the body, if present.
    pub fn payload(&self) -> Option<&Value> {
        self.body.get("response")
    }
}

/// Transport-level interface to a remote device-testing service.
///
/// Implementations only move bytes. A call that reaches the service returns
/// `Ok` whatever the status code; `Err` is reserved for failures where no
/// response was obtained (DNS, TLS, connection resets, local I/O).
#[async_trait]
pub trait DeviceService: Send + Sync {
    /// Uploads an application package.
    async fn upload_app(&self, source: &Path, name: &str) -> RunResult<ApiResponse>;

    /// Uploads a test package of the given type, optionally linked to an app.
    async fn upload_test(
        &self,
        source: &Path,
        test_type: &str,
        app_id: Option<&str>,
    ) -> RunResult<ApiResponse>;

    /// Uploads a runner configuration document for a test.
    async fn upload_config(&self, document: &str, test_id: &str) -> RunResult<ApiResponse>;

    /// Lists tests known to the service.
    async fn list_tests(&self) -> RunResult<ApiResponse>;

    /// Starts a run of `test_id` against `app_id` on the given device type.
    async fn start_run(
        &self,
        device_type_id: &str,
        app_id: &str,
        test_id: &str,
    ) -> RunResult<ApiResponse>;

    /// Queries the status of a run.
    async fn check_status(&self, run_id: &str) -> RunResult<ApiResponse>;

    /// Asks the service to abort a run.
    async fn abort_run(&self, run_id: &str, reason: &str) -> RunResult<ApiResponse>;

    /// Downloads `url` into the local file `dest`.
    async fn download(&self, url: &str, dest: &Path) -> RunResult<()>;

    /// Short name used in log messages.
    fn name(&self) -> &str;
}
