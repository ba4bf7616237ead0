//! Instrumentation test runner.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::{RunVariant, UploadedRun, classify_single};
use crate::classify::{ClassifiedResults, ResultClassifier, ResultsArchive};
use crate::client::RemoteClient;
use crate::error::RunResult;
use crate::package::{DataDependency, package_test};
use crate::poller::PolledStatus;
use crate::run_config::{CaptureOptions, RunConfiguration};
use crate::service::DeviceService;

/// Test type and runner section name used by the service.
pub const INSTRUMENTATION_TEST_TYPE: &str = "robotium";

/// Runs an instrumentation test package against an app.
///
/// Without data dependencies the test package is uploaded as is. With data
/// dependencies it is bundled together with them (and any extra packages)
/// and the bundle is linked to the uploaded app.
#[derive(Debug, Clone)]
pub struct InstrumentationVariant {
    suite: String,
    app_path: PathBuf,
    test_path: PathBuf,
    runner_package: String,
    environment: BTreeMap<String, String>,
    data_deps: Vec<DataDependency>,
    extra_apks: Vec<PathBuf>,
    capture: CaptureOptions,
    classifier: ResultClassifier,
}

impl InstrumentationVariant {
    /// # Errors
    ///
    /// Only fails if the standard classifier patterns do not compile.
    pub fn new(
        suite: impl Into<String>,
        app_path: impl Into<PathBuf>,
        test_path: impl Into<PathBuf>,
        runner_package: impl Into<String>,
    ) -> RunResult<Self> {
        Ok(Self {
            suite: suite.into(),
            app_path: app_path.into(),
            test_path: test_path.into(),
            runner_package: runner_package.into(),
            environment: BTreeMap::new(),
            data_deps: Vec::new(),
            extra_apks: Vec::new(),
            capture: CaptureOptions::default(),
            classifier: ResultClassifier::standard()?,
        })
    }

    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_data_deps(mut self, data_deps: Vec<DataDependency>) -> Self {
        self.data_deps = data_deps;
        self
    }

    /// Extra install packages. Only bundled when there are data dependencies.
    pub fn with_extra_apks(mut self, extra_apks: Vec<PathBuf>) -> Self {
        self.extra_apks = extra_apks;
        self
    }

    pub fn with_capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_classifier(mut self, classifier: ResultClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

#[async_trait]
impl RunVariant for InstrumentationVariant {
    fn name(&self) -> &str {
        &self.suite
    }

    async fn trigger_set_up<S: DeviceService>(
        &self,
        client: &RemoteClient<S>,
    ) -> RunResult<UploadedRun> {
        let mut builder = RunConfiguration::builder(INSTRUMENTATION_TEST_TYPE)
            .capture(self.capture.clone())
            .setting("runner", self.runner_package.as_str())
            .environment(&self.environment);

        let app_id = client.upload_application(&self.app_path, &self.suite).await?;

        let test_id = if self.data_deps.is_empty() {
            client
                .upload_test(INSTRUMENTATION_TEST_TYPE, &self.test_path, None)
                .await?
        } else {
            let artifact = package_test(&self.test_path, &self.data_deps, &self.extra_apks)?;
            info!(
                "Bundled {} files with {}",
                artifact.members.len(),
                artifact.host_test
            );
            builder = builder.artifact(&artifact);
            client
                .upload_test(INSTRUMENTATION_TEST_TYPE, artifact.path(), Some(&app_id))
                .await?
        };

        let config = builder.build()?;
        info!("Setting config: {:?}", config.settings().collect::<Vec<_>>());
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
