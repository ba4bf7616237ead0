//! Validated calls against a [`DeviceService`].
//!
//! [`RemoteClient`] adds three things on top of the raw transport:
//!
//! 1. each call runs with request logging suppressed (see
//!    [`crate::logging::LogControl::sanitize`]);
//! 2. non-success responses become [`RunError::Http`] carrying the status and
//!    a description of what was attempted;
//! 3. the interesting field is pulled out of the `response` payload.
//!
//! Nothing is retried here. The results archive is downloaded at most once
//! per client and cached in a private temporary directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;
use tracing::info;

use crate::error::{RunError, RunResult};
use crate::logging::LogControl;
use crate::poller::PolledStatus;
use crate::run_config::RunConfiguration;
use crate::service::{ApiResponse, DeviceService};

/// File name of the cached results archive.
const RESULTS_FILE: &str = "results";

/// Fails with [`RunError::Http`] unless `response` is a success.
pub fn check_response(response: &ApiResponse, context: &str) -> RunResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(RunError::Http {
            status: response.status,
            context: context.to_string(),
        })
    }
}

/// Extracts `response.<field>` as a string. Numeric ids are accepted.
fn response_field(response: &ApiResponse, field: &str) -> RunResult<String> {
    match response.payload().and_then(|p| p.get(field)) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RunError::MalformedResponse(format!(
            "missing '{}' in service response",
            field
        ))),
    }
}

struct ResultsCache {
    dir: TempDir,
    archive: PathBuf,
}

/// Client for one remote run.
pub struct RemoteClient<S> {
    service: S,
    device_type_id: String,
    log_control: LogControl,
    results: Option<ResultsCache>,
}

impl<S: DeviceService> RemoteClient<S> {
    /// Creates a client that starts runs on `device_type_id`.
    pub fn new(service: S, device_type_id: impl Into<String>) -> Self {
        Self {
            service,
            device_type_id: device_type_id.into(),
            log_control: LogControl::disabled(),
            results: None,
        }
    }

    /// Suppresses request logging through `control` during service calls.
    pub fn with_log_control(mut self, control: LogControl) -> Self {
        self.log_control = control;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Uploads the application under test and returns its app id.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success responses or a missing
    /// `app_id`.
    pub async fn upload_application(&self, path: &Path, name: &str) -> RunResult<String> {
        info!(
            "Uploading {} to remote service as {}.",
            path.display(),
            name
        );
        let response = {
            let _guard = self.log_control.sanitize();
            self.service.upload_app(path, name).await?
        };
        check_response(&response, &format!("Unable to upload {}.", path.display()))?;
        response_field(&response, "app_id")
    }

    /// Uploads a test package and returns its test id.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success responses or a missing
    /// `test_id`.
    pub async fn upload_test(
        &self,
        kind: &str,
        path: &Path,
        app_id: Option<&str>,
    ) -> RunResult<String> {
        info!("Uploading {} to remote service.", path.display());
        let response = {
            let _guard = self.log_control.sanitize();
            self.service.upload_test(path, kind, app_id).await?
        };
        check_response(&response, &format!("Unable to upload {}.", path.display()))?;
        response_field(&response, "test_id")
    }

    /// Uploads the runner configuration for `test_id`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or non-success responses.
    pub async fn upload_configuration(
        &self,
        config: &RunConfiguration,
        test_id: &str,
    ) -> RunResult<()> {
        info!("Generating config file for test.");
        let document = config.render();
        let response = {
            let _guard = self.log_control.sanitize();
            self.service.upload_config(&document, test_id).await?
        };
        check_response(&response, "Unable to upload test config.")
    }

    /// Finds the id of a test registered on the service by its type name.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::TestNotFound`] if no test matches.
    pub async fn test_id_by_name(&self, name: &str) -> RunResult<String> {
        let response = {
            let _guard = self.log_control.sanitize();
            self.service.list_tests().await?
        };
        check_response(&response, "Unable to get tests list.")?;

        let tests = response
            .payload()
            .and_then(Value::as_array)
            .ok_or_else(|| RunError::MalformedResponse("tests list is not an array".to_string()))?;

        tests
            .iter()
            .find(|t| t.get("test_type").and_then(Value::as_str) == Some(name))
            .and_then(|t| match t.get("test_id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| RunError::TestNotFound(name.to_string()))
    }

    /// Starts a run and returns its run id.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success responses or a missing
    /// `test_run_id`.
    pub async fn start_run(&self, app_id: &str, test_id: &str) -> RunResult<String> {
        let response = {
            let _guard = self.log_control.sanitize();
            self.service
                .start_run(&self.device_type_id, app_id, test_id)
                .await?
        };
        check_response(&response, "Unable to run test.")?;
        response_field(&response, "test_run_id")
    }

    /// Fetches the current status of `run_id`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success responses or an unparseable
    /// status payload.
    pub async fn check_status(&self, run_id: &str) -> RunResult<PolledStatus> {
        let response = {
            let _guard = self.log_control.sanitize();
            self.service.check_status(run_id).await?
        };
        check_response(&response, "Unable to get test status.")?;

        let payload = response
            .payload()
            .cloned()
            .ok_or_else(|| RunError::MalformedResponse("status has no response".to_string()))?;
        serde_json::from_value(payload)
            .map_err(|e| RunError::MalformedResponse(format!("invalid status payload: {}", e)))
    }

    /// Asks the service to abort `run_id`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or non-success responses.
    pub async fn abort_run(&self, run_id: &str, reason: &str) -> RunResult<()> {
        let response = {
            let _guard = self.log_control.sanitize();
            self.service.abort_run(run_id, reason).await?
        };
        check_response(&response, "Unable to abort test.")
    }

    /// Downloads the results archive from `url`, once.
    ///
    /// Later calls reuse the cached archive. When `target` is given the
    /// cached archive is also copied there, creating parent directories.
    /// Returns the path of the cached archive.
    ///
    /// # Errors
    ///
    /// Fails if the download or the copy fails.
    pub async fn download_results(&mut self, url: &str, target: Option<&Path>) -> RunResult<PathBuf> {
        let archive = match &self.results {
            Some(cache) => cache.archive.clone(),
            None => {
                let dir = tempfile::Builder::new().prefix("devrun-results-").tempdir()?;
                let archive = dir.path().join(RESULTS_FILE);
                info!("Downloading results to {}.", dir.path().display());
                {
                    let _guard = self.log_control.sanitize();
                    self.service.download(url, &archive).await?;
                }
                self.results = Some(ResultsCache {
                    dir,
                    archive: archive.clone(),
                });
                archive
            }
        };

        if let Some(target) = target {
            info!("Copying results to {}", target.display());
            if let Some(parent) = target.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&archive, target)?;
        }

        Ok(archive)
    }

    /// Path of the cached results archive, if downloaded.
    pub fn cached_results(&self) -> Option<&Path> {
        self.results.as_ref().map(|c| c.archive.as_path())
    }

    /// Removes the cached results directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be removed.
    pub fn cleanup(&mut self) -> RunResult<()> {
        if let Some(cache) = self.results.take() {
            let path = cache.dir.path().to_path_buf();
            cache.dir.close()?;
            info!("Removed results cache {}", path.display());
        }
        Ok(())
    }
}
