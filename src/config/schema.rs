//! Configuration schema definitions for devrun.
//!
//! ```text
//! Config (root)
//! ├── ServiceConfig     - Where the device service lives and how to log in
//! ├── TestConfig        - App, test package and data dependencies
//! ├── RunnerConfig      - Tagged enum selecting the runner variant
//! │   ├── Instrumentation
//! │   └── UiRobot
//! ├── CaptureOptions    - Global capture section of the runner config
//! ├── PollConfig        - Poll and heartbeat intervals
//! └── TimeoutTable      - Seconds allowed per detailed status
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::package::DataDependency;
use crate::poller::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_WAIT_INTERVAL, TimeoutTable};
use crate::run_config::CaptureOptions;
use crate::variant::uirobot::{DEFAULT_ROBOT_MINUTES, DEFAULT_ROBOT_RUNNER};

/// Root configuration structure for devrun.
///
/// # TOML Structure
///
/// ```toml
/// results_path = "out/results.zip"
///
/// [service]
/// device_type_id = "587"
///
/// [test]
/// suite = "content_shell"
/// app_path = "out/ContentShell.apk"
/// test_path = "out/ContentShellTest.apk"
///
/// [runner]
/// type = "instrumentation"
/// runner_package = "org.chromium.test.Runner"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Copy of the results archive written by `collect` (optional).
    #[serde(default)]
    pub results_path: Option<PathBuf>,

    pub service: ServiceConfig,

    pub test: TestConfig,

    pub runner: RunnerConfig,

    #[serde(default)]
    pub capture: CaptureOptions,

    #[serde(default)]
    pub poll: PollConfig,

    /// Per-status limits. A table given here replaces the defaults entirely;
    /// an `unknown` entry is added if missing.
    #[serde(default)]
    pub timeouts: TimeoutTable,
}

/// Connection settings for the device service.
///
/// | Field | Default |
/// |-------|---------|
/// | `base_url` | `https://live.appurify.com/resource` |
/// | `api_token` | None |
/// | `api_token_env` | `DEVRUN_API_TOKEN` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Access token. Prefer `api_token_env` so the token stays out of the file.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Environment variable read when `api_token` is not set.
    #[serde(default = "default_token_env")]
    pub api_token_env: String,

    /// Device type the run is scheduled on.
    pub device_type_id: String,
}

fn default_base_url() -> String {
    "https://live.appurify.com/resource".to_string()
}

fn default_token_env() -> String {
    "DEVRUN_API_TOKEN".to_string()
}

/// What gets uploaded.
///
/// # Example
///
/// ```toml
/// [test]
/// suite = "content_shell"
/// app_path = "out/ContentShell.apk"
/// test_path = "out/ContentShellTest.apk"
/// extra_apks = ["out/ContentShellSupport.apk"]
///
/// [[test.data_deps]]
/// host = "out/test_data"
/// device = "/sdcard/test_data"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestConfig {
    /// Name of the suite; used as the app name and the result name.
    pub suite: String,

    pub app_path: PathBuf,

    /// Test package. Required by the instrumentation runner.
    #[serde(default)]
    pub test_path: Option<PathBuf>,

    #[serde(default)]
    pub data_deps: Vec<DataDependency>,

    /// Auxiliary packages, bundled only together with data dependencies.
    #[serde(default)]
    pub extra_apks: Vec<PathBuf>,
}

/// Runner variant selection.
///
/// ```toml
/// [runner]
/// type = "instrumentation"
/// runner_package = "org.chromium.test.Runner"
/// environment = { LANG = "en_US" }
///
/// # or
/// [runner]
/// type = "uirobot"
/// minutes = 10
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunnerConfig {
    Instrumentation(InstrumentationConfig),
    UiRobot(UiRobotConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentationConfig {
    /// Instrumentation runner class on the device.
    pub runner_package: String,

    /// Passed to the runner as `environment_vars`.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiRobotConfig {
    /// Registered test type to run.
    ///
    /// Default: `android_robot`
    #[serde(default = "default_robot_runner")]
    pub runner_type: String,

    /// Minutes the robot exercises the app.
    ///
    /// Default: 5
    #[serde(default = "default_robot_minutes")]
    pub minutes: u32,
}

fn default_robot_runner() -> String {
    DEFAULT_ROBOT_RUNNER.to_string()
}

fn default_robot_minutes() -> u32 {
    DEFAULT_ROBOT_MINUTES
}

/// Poll timing.
///
/// | Field | Default |
/// |-------|---------|
/// | `wait_interval_secs` | 5 |
/// | `heartbeat_interval_secs` | 300 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_wait_interval")]
    pub wait_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

impl PollConfig {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            wait_interval_secs: default_wait_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

fn default_wait_interval() -> u64 {
    DEFAULT_WAIT_INTERVAL.as_secs()
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}
