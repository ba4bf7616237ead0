//! Scripted in-memory [`DeviceService`] used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use zip::ZipWriter;
use zip::write::FileOptions;

use super::{ApiResponse, DeviceService};
use crate::error::RunResult;

pub(crate) const RESULTS_URL: &str = "https://results.test/run-1/results.zip";

/// Builds an in-memory zip archive from `(name, contents)` pairs.
pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    statuses: VecDeque<Value>,
    last_status: Option<Value>,
    failures: HashMap<String, u16>,
    tests: Vec<Value>,
    uploaded_configs: Vec<String>,
    archive: Vec<u8>,
}

/// Records every call and answers from a script.
///
/// Status polls consume the scripted queue and then keep repeating the
/// last entry, so a queue ending in `complete` stays complete.
#[derive(Default)]
pub(crate) struct FakeService {
    state: Mutex<FakeState>,
}

impl FakeService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues in-progress statuses followed by a terminal one.
    pub(crate) fn with_statuses(self, detailed: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for d in detailed {
                state
                    .statuses
                    .push_back(json!({"status": "in-progress", "detailed_status": d}));
            }
        }
        self
    }

    /// Queues the terminal status with the given results payload.
    pub(crate) fn completing_with(self, pass: bool, output: &str, exception: &str) -> Self {
        self.state.lock().unwrap().statuses.push_back(json!({
            "status": "complete",
            "detailed_status": "results-ready",
            "results": {
                "pass": pass,
                "output": output,
                "exception": exception,
                "url": RESULTS_URL,
            }
        }));
        self
    }

    /// Serves `entries` as the results archive.
    pub(crate) fn with_archive(self, entries: &[(&str, &str)]) -> Self {
        self.state.lock().unwrap().archive = zip_bytes(entries);
        self
    }

    /// Registers a test returned by `list_tests`.
    pub(crate) fn with_test(self, test_type: &str, test_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .tests
            .push(json!({"test_type": test_type, "test_id": test_id}));
        self
    }

    /// Makes `endpoint` answer with `status` and an empty body.
    pub(crate) fn failing(self, endpoint: &str, status: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(endpoint.to_string(), status);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == endpoint).count()
    }

    pub(crate) fn uploaded_configs(&self) -> Vec<String> {
        self.state.lock().unwrap().uploaded_configs.clone()
    }

    fn answer(&self, endpoint: &str, payload: Value) -> RunResult<ApiResponse> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(endpoint.to_string());
        if let Some(status) = state.failures.get(endpoint) {
            return Ok(ApiResponse::new(*status, Value::Null));
        }
        Ok(ApiResponse::new(200, json!({ "response": payload })))
    }
}

#[async_trait]
impl DeviceService for FakeService {
    async fn upload_app(&self, _source: &Path, _name: &str) -> RunResult<ApiResponse> {
        self.answer("upload_app", json!({"app_id": "app-1"}))
    }

    async fn upload_test(
        &self,
        _source: &Path,
        _test_type: &str,
        _app_id: Option<&str>,
    ) -> RunResult<ApiResponse> {
        self.answer("upload_test", json!({"test_id": "test-1"}))
    }

    async fn upload_config(&self, document: &str, _test_id: &str) -> RunResult<ApiResponse> {
        self.state
            .lock()
            .unwrap()
            .uploaded_configs
            .push(document.to_string());
        self.answer("upload_config", json!({}))
    }

    async fn list_tests(&self) -> RunResult<ApiResponse> {
        let tests = self.state.lock().unwrap().tests.clone();
        self.answer("list_tests", Value::Array(tests))
    }

    async fn start_run(
        &self,
        _device_type_id: &str,
        _app_id: &str,
        _test_id: &str,
    ) -> RunResult<ApiResponse> {
        self.answer("start_run", json!({"test_run_id": "run-1"}))
    }

    async fn check_status(&self, _run_id: &str) -> RunResult<ApiResponse> {
        let status = {
            let mut state = self.state.lock().unwrap();
            match state.statuses.pop_front() {
                Some(next) => {
                    state.last_status = Some(next.clone());
                    next
                }
                None => state
                    .last_status
                    .clone()
                    .unwrap_or_else(|| json!({"status": "queued", "detailed_status": "queued"})),
            }
        };
        self.answer("check_status", status)
    }

    async fn abort_run(&self, _run_id: &str, _reason: &str) -> RunResult<ApiResponse> {
        self.answer("abort_run", json!({}))
    }

    async fn download(&self, _url: &str, dest: &Path) -> RunResult<()> {
        let archive = {
            let mut state = self.state.lock().unwrap();
            state.calls.push("download".to_string());
            state.archive.clone()
        };
        std::fs::write(dest, archive)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
