//! HTTP implementation of [`DeviceService`].
//!
//! Speaks the Appurify-style resource API: every request carries an
//! `access_token`, uploads are multipart forms with a `source` file part,
//! and every answer wraps its payload in a `response` object.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

use super::{ApiResponse, DeviceService};
use crate::error::{RunError, RunResult};

/// Per-request timeout. Artifact uploads can be large.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Device service reached over HTTPS.
pub struct HttpDeviceService {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDeviceService {
    /// Creates a service client for `base_url` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Transport`] if the HTTP client cannot be built
    /// (for example when no TLS backend is available).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> RunResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RunError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/", self.base_url.trim_end_matches('/'), endpoint)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RunResult<ApiResponse> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);
        Ok(ApiResponse::new(status, body))
    }

    async fn file_part(path: &Path) -> RunResult<Part> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        Ok(Part::bytes(bytes).file_name(file_name))
    }
}

fn transport_error(err: reqwest::Error) -> RunError {
    RunError::Transport(err.to_string())
}

#[async_trait]
impl DeviceService for HttpDeviceService {
    async fn upload_app(&self, source: &Path, name: &str) -> RunResult<ApiResponse> {
        let form = Form::new()
            .text("access_token", self.token.clone())
            .text("source_type", "raw")
            .text("name", name.to_string())
            .part("source", Self::file_part(source).await?);
        self.send(self.client.post(self.url("apps/upload")).multipart(form))
            .await
    }

    async fn upload_test(
        &self,
        source: &Path,
        test_type: &str,
        app_id: Option<&str>,
    ) -> RunResult<ApiResponse> {
        let mut form = Form::new()
            .text("access_token", self.token.clone())
            .text("source_type", "raw")
            .text("test_type", test_type.to_string());
        if let Some(app_id) = app_id {
            form = form.text("app_id", app_id.to_string());
        }
        let form = form.part("source", Self::file_part(source).await?);
        self.send(self.client.post(self.url("tests/upload")).multipart(form))
            .await
    }

    async fn upload_config(&self, document: &str, test_id: &str) -> RunResult<ApiResponse> {
        let part = Part::bytes(document.as_bytes().to_vec()).file_name("config.txt");
        let form = Form::new()
            .text("access_token", self.token.clone())
            .text("test_id", test_id.to_string())
            .part("source", part);
        self.send(self.client.post(self.url("config/upload")).multipart(form))
            .await
    }

    async fn list_tests(&self) -> RunResult<ApiResponse> {
        let request = self
            .client
            .get(self.url("tests/list"))
            .query(&[("access_token", self.token.as_str())]);
        self.send(request).await
    }

    async fn start_run(
        &self,
        device_type_id: &str,
        app_id: &str,
        test_id: &str,
    ) -> RunResult<ApiResponse> {
        let request = self.client.post(self.url("tests/run")).form(&[
            ("access_token", self.token.as_str()),
            ("device_type_ids", device_type_id),
            ("app_id", app_id),
            ("test_id", test_id),
        ]);
        self.send(request).await
    }

    async fn check_status(&self, run_id: &str) -> RunResult<ApiResponse> {
        let request = self.client.get(self.url("tests/check")).query(&[
            ("access_token", self.token.as_str()),
            ("test_run_id", run_id),
        ]);
        self.send(request).await
    }

    async fn abort_run(&self, run_id: &str, reason: &str) -> RunResult<ApiResponse> {
        let request = self.client.post(self.url("tests/abort")).form(&[
            ("access_token", self.token.as_str()),
            ("test_run_id", run_id),
            ("reason", reason),
        ]);
        self.send(request).await
    }

    async fn download(&self, url: &str, dest: &Path) -> RunResult<()> {
        debug!("Fetching {}", url);
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RunError::Http {
                status: status.as_u16(),
                context: "Unable to download test results.".to_string(),
            });
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
