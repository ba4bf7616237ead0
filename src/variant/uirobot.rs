//! UI robot runner: the service exercises the app on its own for a while.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{RunVariant, UploadedRun, classify_single};
use crate::classify::{ClassifiedResults, ResultClassifier, ResultsArchive};
use crate::client::RemoteClient;
use crate::error::RunResult;
use crate::poller::PolledStatus;
use crate::run_config::{CaptureOptions, RunConfiguration};
use crate::service::DeviceService;

/// Runner type of the service's built-in UI robot test.
pub const DEFAULT_ROBOT_RUNNER: &str = "android_robot";

/// Default run length in minutes.
pub const DEFAULT_ROBOT_MINUTES: u32 = 5;

#[derive(Debug, Clone)]
pub struct UiRobotVariant {
    suite: String,
    app_path: PathBuf,
    runner_type: String,
    minutes: u32,
    capture: CaptureOptions,
    classifier: ResultClassifier,
}

impl UiRobotVariant {
    /// # Errors
    ///
    /// Only fails if the standard classifier patterns do not compile.
    pub fn new(suite: impl Into<String>, app_path: impl Into<PathBuf>) -> RunResult<Self> {
        Ok(Self {
            suite: suite.into(),
            app_path: app_path.into(),
            runner_type: DEFAULT_ROBOT_RUNNER.to_string(),
            minutes: DEFAULT_ROBOT_MINUTES,
            capture: CaptureOptions::default(),
            classifier: ResultClassifier::standard()?,
        })
    }

    /// Name of the registered test to run, also the runner section name.
    pub fn with_runner_type(mut self, runner_type: impl Into<String>) -> Self {
        self.runner_type = runner_type.into();
        self
    }

    pub fn with_minutes(mut self, minutes: u32) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn with_capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }
}

#[async_trait]
impl RunVariant for UiRobotVariant {
    fn name(&self) -> &str {
        &self.suite
    }

    async fn trigger_set_up<S: DeviceService>(
        &self,
        client: &RemoteClient<S>,
    ) -> RunResult<UploadedRun> {
        let config = RunConfiguration::builder(self.runner_type.as_str())
            .capture(self.capture.clone())
            .setting("duration", self.minutes.to_string())
            .build()?;

        let app_id = client.upload_application(&self.app_path, &self.suite).await?;
        let test_id = client.test_id_by_name(&self.runner_type).await?;
        client.upload_configuration(&config, &test_id).await?;

        Ok(UploadedRun { app_id, test_id })
    }

    fn parse_results(
        &self,
        status: &PolledStatus,
        archive: &ResultsArchive,
    ) -> RunResult<ClassifiedResults> {
        classify_single(&self.classifier, &self.suite, status, archive)
    }
}
