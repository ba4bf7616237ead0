//! Lifecycle of one remote test run.
//!
//! A run is split across two invocations that share only the state file:
//!
//! ```text
//!   trigger:  set_up ── variant uploads ── start run
//!             tear_down ── write state file
//!
//!   collect:  set_up ── read state file
//!             execute ── poll ── download ── classify
//!             tear_down ── abort if unfinished ── remove results cache
//! ```
//!
//! [`RemoteDeviceTestRun::run`] performs all three steps and always tears
//! down, whatever `set_up` or `execute` returned.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::classify::{ClassifiedResults, ResultsArchive};
use crate::client::RemoteClient;
use crate::error::{RunError, RunResult};
use crate::poller::{PolledStatus, StatusPoller, StatusSource};
use crate::service::DeviceService;
use crate::state::PersistedState;
use crate::variant::RunVariant;

/// Reason sent with the abort issued at teardown.
pub const ABORT_REASON: &str = "Test runner exiting.";

/// Which half of the run this invocation performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Upload and start the run, then write the state file.
    Trigger { state_path: PathBuf },
    /// Read the state file, then wait for and classify the results.
    Collect { state_path: PathBuf },
}

impl RunMode {
    pub fn state_path(&self) -> &Path {
        match self {
            RunMode::Trigger { state_path } | RunMode::Collect { state_path } => state_path,
        }
    }
}

/// Polls one run through a [`RemoteClient`], remembering the last status.
struct ClientStatus<'a, S> {
    client: &'a RemoteClient<S>,
    run_id: &'a str,
    last: &'a mut Option<PolledStatus>,
}

#[async_trait]
impl<'a, S: DeviceService> StatusSource for ClientStatus<'a, S> {
    async fn poll_status(&mut self) -> RunResult<PolledStatus> {
        let status = self.client.check_status(self.run_id).await?;
        *self.last = Some(status.clone());
        Ok(status)
    }
}

/// One remote test run, in trigger or collect mode.
pub struct RemoteDeviceTestRun<S, V> {
    client: RemoteClient<S>,
    variant: V,
    mode: RunMode,
    poller: StatusPoller,
    results_path: Option<PathBuf>,
    app_id: String,
    test_id: String,
    run_id: String,
    status: Option<PolledStatus>,
}

impl<S: DeviceService, V: RunVariant> RemoteDeviceTestRun<S, V> {
    pub fn new(client: RemoteClient<S>, variant: V, mode: RunMode, poller: StatusPoller) -> Self {
        Self {
            client,
            variant,
            mode,
            poller,
            results_path: None,
            app_id: String::new(),
            test_id: String::new(),
            run_id: String::new(),
            status: None,
        }
    }

    /// Copies the downloaded results archive to `path` during collect.
    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = Some(path.into());
        self
    }

    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    pub fn client(&self) -> &RemoteClient<S> {
        &self.client
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Empty until the app has been uploaded.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Empty until the run is started or restored.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The last status seen, if any.
    pub fn status(&self) -> Option<&PolledStatus> {
        self.status.as_ref()
    }

    fn is_known_complete(&self) -> bool {
        self.status.as_ref().is_some_and(PolledStatus::is_complete)
    }

    /// Starts the run (trigger) or restores its id (collect).
    ///
    /// # Errors
    ///
    /// Trigger: any upload, packaging or start failure. Collect:
    /// [`RunError::Configuration`] if the state file is unusable.
    pub async fn set_up(&mut self) -> RunResult<()> {
        match &self.mode {
            RunMode::Trigger { .. } => {
                let uploaded = self.variant.trigger_set_up(&self.client).await?;
                self.app_id = uploaded.app_id;
                self.test_id = uploaded.test_id;
                self.run_id = self.client.start_run(&self.app_id, &self.test_id).await?;
                info!("Started test run {} ({})", self.run_id, self.variant.name());
            }
            RunMode::Collect { state_path } => {
                let state = PersistedState::load(state_path)?;
                self.run_id = state.run_id().to_string();
                info!("Collecting test run {}", self.run_id);
            }
        }
        Ok(())
    }

    /// Waits for and classifies the results. Does nothing in trigger mode.
    ///
    /// # Errors
    ///
    /// Poll and download failures, [`RunError::RemoteException`] when the
    /// service reports an internal error, and classification errors such as
    /// [`RunError::DeviceOffline`].
    pub async fn execute(&mut self) -> RunResult<Option<ClassifiedResults>> {
        if let RunMode::Trigger { .. } = self.mode {
            return Ok(None);
        }

        let status = {
            let mut source = ClientStatus {
                client: &self.client,
                run_id: &self.run_id,
                last: &mut self.status,
            };
            self.poller.wait_for_completion(&mut source).await?
        };

        let results = status
            .results
            .as_ref()
            .ok_or_else(|| RunError::MalformedResponse("completed run has no results".to_string()))?;
        let archive = self
            .client
            .download_results(&results.url, self.results_path.as_deref())
            .await?;

        if let Some(exception) = results.exception() {
            return Err(RunError::RemoteException(exception.to_string()));
        }

        self.variant
            .parse_results(&status, &ResultsArchive::open(archive))
            .map(Some)
    }

    /// Writes the state file (trigger), or aborts an unfinished run and
    /// removes the results cache (collect).
    ///
    /// Collect teardown never fails; problems are logged.
    ///
    /// # Errors
    ///
    /// Trigger: the state file cannot be written.
    pub async fn tear_down(&mut self) -> RunResult<()> {
        if let RunMode::Trigger { state_path } = &self.mode {
            if self.run_id.is_empty() {
                warn!("No test run was started; writing empty state");
            }
            return PersistedState::new(self.run_id.as_str()).save(state_path);
        }

        if !self.run_id.is_empty() && !self.is_known_complete() {
            self.abort_if_running().await;
        }
        if let Err(e) = self.client.cleanup() {
            warn!("Unable to remove results cache: {}", e);
        }
        Ok(())
    }

    async fn abort_if_running(&mut self) {
        match self.client.check_status(&self.run_id).await {
            Ok(status) if status.is_complete() => {
                self.status = Some(status);
                return;
            }
            Ok(status) => self.status = Some(status),
            Err(e) => warn!("Unable to get status of test run {}: {}", self.run_id, e),
        }
        info!("Aborting test run {}", self.run_id);
        if let Err(e) = self.client.abort_run(&self.run_id, ABORT_REASON).await {
            warn!("Unable to abort test run {}: {}", self.run_id, e);
        }
    }

    /// Runs `set_up` and `execute`, then always `tear_down`.
    ///
    /// # Errors
    ///
    /// The first error from `set_up` or `execute`. A teardown error is only
    /// returned when the body succeeded; otherwise it is logged.
    pub async fn run(&mut self) -> RunResult<Option<ClassifiedResults>> {
        let body = match self.set_up().await {
            Ok(()) => self.execute().await,
            Err(e) => Err(e),
        };
        let teardown = self.tear_down().await;

        match (body, teardown) {
            (Ok(results), Ok(())) => Ok(results),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!("Teardown failed: {}", teardown_err);
                Err(e)
            }
        }
    }
}
