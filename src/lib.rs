//! devrun: drives a single test run on a remote device-testing service.
//!
//! A run is split into two invocations that share nothing but a small state
//! file: `trigger` uploads the app and test, starts the run and writes the
//! run id; `collect` reads the run id back, waits for completion, downloads
//! the results and classifies them.
//!
//! # Architecture
//!
//! - **Service**: raw HTTP access to the device service ([`service`])
//! - **Client**: validated uploads, status checks and downloads ([`client`])
//! - **Variants**: runner-specific uploads and result parsing ([`variant`])
//! - **Poller**: completion polling with per-status timeouts ([`poller`])
//! - **Classifier**: separates test failures from infrastructure failures
//!   ([`classify`])
//! - **Run**: the trigger/collect lifecycle ([`run`])
//!
//! # Example
//!
//! ```no_run
//! use devrun::client::RemoteClient;
//! use devrun::poller::{StatusPoller, TimeoutTable};
//! use devrun::run::{RemoteDeviceTestRun, RunMode};
//! use devrun::service::HttpDeviceService;
//! use devrun::variant::UiRobotVariant;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = HttpDeviceService::new("https://live.appurify.com/resource", "token")?;
//!     let client = RemoteClient::new(service, "587");
//!     let variant = UiRobotVariant::new("chrome", "Chrome.apk")?;
//!     let mode = RunMode::Trigger { state_path: "state.json".into() };
//!     let mut run = RemoteDeviceTestRun::new(
//!         client,
//!         variant,
//!         mode,
//!         StatusPoller::new(TimeoutTable::default()),
//!     );
//!     run.run().await?;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod package;
pub mod poller;
pub mod report;
pub mod run;
pub mod run_config;
pub mod service;
pub mod state;
pub mod variant;

// Re-export commonly used types
pub use classify::{ClassifiedResult, ClassifiedResults, ResultKind};
pub use config::{Config, load_config};
pub use error::{RunError, RunResult};
pub use run::{RemoteDeviceTestRun, RunMode};
