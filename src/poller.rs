//! Status polling with per-status timeout accounting.
//!
//! A remote run moves through a sequence of service-defined statuses
//! (`queueing`, `installing`, `in-progress`, ...) until its coarse status
//! becomes [`COMPLETE`]. Each detailed status has its own time budget in a
//! [`TimeoutTable`]; entering a new detailed status starts a fresh budget.
//!
//! Time is counted in wait intervals, not wall-clock time: every tick adds
//! the configured interval to both the status counter and the heartbeat
//! counter, regardless of how long the status request itself took.
//!
//! ```text
//!   poll ──► complete? ──yes──► Ok(status)
//!              │ no
//!              ▼
//!     detailed status changed? ──yes──► log, reset both counters
//!              │
//!     heartbeat > interval?    ──yes──► log, reset heartbeat
//!              │
//!     elapsed > limit?         ──yes──► Err(Timeout)
//!              │
//!            sleep ──► counters += interval ──► poll
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{RunError, RunResult};

/// Coarse status reported once a run has finished.
pub const COMPLETE: &str = "complete";

/// Timeout table key used for statuses without their own entry.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Time between status polls.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest accepted wait interval. The timeout counters only advance by
/// the wait interval, so a zero interval would never time out.
pub const MIN_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Time in an unchanged status between liveness log lines.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// Limit applied when even the `unknown` entry is missing.
const FALLBACK_UNKNOWN_TIMEOUT_SECS: u64 = 300;

/// Status payload returned by the service on every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolledStatus {
    /// Coarse status; [`COMPLETE`] ends polling.
    #[serde(default, deserialize_with = "nullable_string")]
    pub status: String,

    /// Fine-grained status used for transition detection and timeouts.
    #[serde(default, deserialize_with = "nullable_string")]
    pub detailed_status: String,

    /// Present once the run is complete.
    #[serde(default)]
    pub results: Option<RunResults>,
}

impl PolledStatus {
    /// Returns `true` once the run has reached its terminal status.
    pub fn is_complete(&self) -> bool {
        self.status == COMPLETE
    }
}

/// The `results` object of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    /// Whether the service considers the run passed.
    #[serde(default, deserialize_with = "flag")]
    pub pass: bool,

    /// Free-form runner output.
    #[serde(default, deserialize_with = "nullable_string")]
    pub output: String,

    /// Internal service exception, empty or absent when none.
    #[serde(default)]
    pub exception: Option<String>,

    /// Where the results archive can be downloaded.
    #[serde(default, deserialize_with = "nullable_string")]
    pub url: String,
}

impl RunResults {
    /// The reported exception, if it is non-empty.
    pub fn exception(&self) -> Option<&str> {
        self.exception
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// Accepts `true`/`false`, `0`/`1` and `"true"`/`"1"` style flags.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        serde_json::Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    })
}

/// Treats `null` like a missing string.
fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Maximum seconds a run may spend in each detailed status.
///
/// Statuses without an entry use the `unknown` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutTable(HashMap<String, u64>);

impl TimeoutTable {
    /// Creates a table holding only the `unknown` entry.
    pub fn new(unknown_secs: u64) -> Self {
        let mut entries = HashMap::new();
        entries.insert(UNKNOWN_STATUS.to_string(), unknown_secs);
        Self(entries)
    }

    /// Adds or replaces the limit for `status`.
    pub fn with(mut self, status: impl Into<String>, secs: u64) -> Self {
        self.0.insert(status.into(), secs);
        self
    }

    /// Ensures the `unknown` entry exists.
    pub fn ensure_unknown(&mut self) {
        self.0
            .entry(UNKNOWN_STATUS.to_string())
            .or_insert(FALLBACK_UNKNOWN_TIMEOUT_SECS);
    }

    /// The limit for `status`, falling back to the `unknown` entry.
    pub fn limit_for(&self, status: &str) -> Duration {
        let secs = self
            .0
            .get(status)
            .or_else(|| self.0.get(UNKNOWN_STATUS))
            .copied()
            .unwrap_or(FALLBACK_UNKNOWN_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self::new(FALLBACK_UNKNOWN_TIMEOUT_SECS)
            .with("queueing", 600)
            .with("installing", 600)
            .with("in-progress", 3600)
    }
}

/// Source of status snapshots for one run.
#[async_trait]
pub trait StatusSource: Send {
    /// Queries the current status.
    async fn poll_status(&mut self) -> RunResult<PolledStatus>;
}

/// What happened on a tick, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Changed,
    Heartbeat,
    Steady,
}

/// Elapsed and heartbeat counters for the current detailed status.
#[derive(Debug, Default)]
struct StatusTracker {
    current: String,
    elapsed: Duration,
    since_heartbeat: Duration,
}

impl StatusTracker {
    fn observe(&mut self, detailed: &str, heartbeat_interval: Duration) -> Tick {
        if detailed != self.current {
            self.current = detailed.to_string();
            self.elapsed = Duration::ZERO;
            self.since_heartbeat = Duration::ZERO;
            return Tick::Changed;
        }
        if self.since_heartbeat > heartbeat_interval {
            self.since_heartbeat = Duration::ZERO;
            return Tick::Heartbeat;
        }
        Tick::Steady
    }

    fn advance(&mut self, interval: Duration) {
        self.elapsed += interval;
        self.since_heartbeat += interval;
    }
}

/// Polls a [`StatusSource`] until the run completes or a status times out.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    timeouts: TimeoutTable,
    wait_interval: Duration,
    heartbeat_interval: Duration,
    cancellation_token: Option<CancellationToken>,
}

impl StatusPoller {
    /// Creates a poller with the default wait and heartbeat intervals.
    pub fn new(timeouts: TimeoutTable) -> Self {
        Self {
            timeouts,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            cancellation_token: None,
        }
    }

    /// Sets the time between polls, at least [`MIN_WAIT_INTERVAL`].
    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval.max(MIN_WAIT_INTERVAL);
        self
    }

    /// Sets the time between liveness log lines.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Aborts the wait between polls when `token` is cancelled.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Polls until the coarse status is [`COMPLETE`] and returns that status.
    ///
    /// # Errors
    ///
    /// - [`RunError::Timeout`] when a detailed status outlives its limit
    /// - [`RunError::Cancelled`] when the cancellation token fires
    /// - any error returned by the source
    pub async fn wait_for_completion<T>(&self, source: &mut T) -> RunResult<PolledStatus>
    where
        T: StatusSource + ?Sized,
    {
        let mut tracker = StatusTracker::default();

        loop {
            let status = source.poll_status().await?;
            if status.is_complete() {
                info!("Test status: {}", COMPLETE);
                return Ok(status);
            }

            match tracker.observe(&status.detailed_status, self.heartbeat_interval) {
                Tick::Changed | Tick::Heartbeat => {
                    info!("Test status: {}", status.detailed_status)
                }
                Tick::Steady => {}
            }

            let limit = self.timeouts.limit_for(&tracker.current);
            if tracker.elapsed > limit {
                return Err(RunError::Timeout {
                    status: tracker.current,
                    elapsed_secs: tracker.elapsed.as_secs(),
                    limit_secs: limit.as_secs(),
                });
            }

            self.wait().await?;
            tracker.advance(self.wait_interval);
            debug!(
                "{}s in status '{}'",
                tracker.elapsed.as_secs(),
                tracker.current
            );
        }
    }

    async fn wait(&self) -> RunResult<()> {
        match &self.cancellation_token {
            Some(token) => select! {
                biased;
                _ = token.cancelled() => Err(RunError::Cancelled),
                _ = tokio::time::sleep(self.wait_interval) => Ok(()),
            },
            None => {
                tokio::time::sleep(self.wait_interval).await;
                Ok(())
            }
        }
    }
}
