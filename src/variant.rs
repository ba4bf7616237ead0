//! Runner variants.
//!
//! A variant knows which artifacts a runner needs on the service and how to
//! read its results. The lifecycle controller only drives the variant
//! through [`RunVariant`].

pub mod instrumentation;
pub mod uirobot;

use async_trait::async_trait;

use crate::classify::{ClassifiedResults, ResultClassifier, ResultsArchive};
use crate::client::RemoteClient;
use crate::error::{RunError, RunResult};
use crate::poller::PolledStatus;
use crate::service::DeviceService;

pub use instrumentation::InstrumentationVariant;
pub use uirobot::UiRobotVariant;

/// Ids created on the service by a trigger set-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedRun {
    pub app_id: String,
    pub test_id: String,
}

/// Runner-specific part of a remote test run.
#[async_trait]
pub trait RunVariant: Send + Sync {
    /// Name used for results and logging.
    fn name(&self) -> &str;

    /// Uploads the app, the test and the runner configuration.
    async fn trigger_set_up<S: DeviceService>(
        &self,
        client: &RemoteClient<S>,
    ) -> RunResult<UploadedRun>;

    /// Turns the terminal status and results archive into classified results.
    fn parse_results(
        &self,
        status: &PolledStatus,
        archive: &ResultsArchive,
    ) -> RunResult<ClassifiedResults>;
}

/// Classifies the single result every shipped variant produces.
pub(crate) fn classify_single(
    classifier: &ResultClassifier,
    name: &str,
    status: &PolledStatus,
    archive: &ResultsArchive,
) -> RunResult<ClassifiedResults> {
    let results = status
        .results
        .as_ref()
        .ok_or_else(|| RunError::MalformedResponse("completed run has no results".to_string()))?;
    Ok(classifier.classify(name, results, archive)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::COMPLETE;

    #[test]
    fn test_missing_results_is_malformed() {
        let classifier = ResultClassifier::standard().unwrap();
        let status = PolledStatus {
            status: COMPLETE.to_string(),
            ..Default::default()
        };

        let err = classify_single(&classifier, "suite", &status, &ResultsArchive::open("x"))
            .unwrap_err();

        assert!(matches!(err, RunError::MalformedResponse(_)));
    }
}
