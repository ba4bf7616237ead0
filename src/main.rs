//! devrun CLI - trigger and collect test runs on a remote device service.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use devrun::client::RemoteClient;
use devrun::config::{self, Config, RunnerConfig};
use devrun::logging::{self, LogControl};
use devrun::poller::StatusPoller;
use devrun::report;
use devrun::run::{RemoteDeviceTestRun, RunMode};
use devrun::service::{DeviceService, HttpDeviceService};
use devrun::variant::{InstrumentationVariant, RunVariant, UiRobotVariant};

/// Exit status for failures that are not the test's fault.
const INFRA_ERROR_EXIT_CODE: i32 = 87;

#[derive(Parser)]
#[command(name = "devrun")]
#[command(about = "Run tests on a remote device service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "devrun.toml")]
    config: PathBuf,

    /// Verbose output (-v debug, -vv trace and unsanitized service logging)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the app and test, start the run and write the state file
    Trigger {
        /// State file handed to `collect`
        #[arg(long)]
        state: PathBuf,
    },

    /// Wait for a triggered run and classify its results
    Collect {
        /// State file written by `trigger`
        #[arg(long)]
        state: PathBuf,

        /// Copy the results archive here (overrides `results_path`)
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_control = logging::init(cli.verbose)?;

    match cli.command {
        Commands::Trigger { state } => {
            let mode = RunMode::Trigger { state_path: state };
            run_mode(&cli.config, mode, None, log_control).await
        }
        Commands::Collect { state, results } => {
            let mode = RunMode::Collect { state_path: state };
            run_mode(&cli.config, mode, results, log_control).await
        }
        Commands::Validate => validate_config(&cli.config),
    }
}

async fn run_mode(
    config_path: &Path,
    mode: RunMode,
    results_override: Option<PathBuf>,
    log_control: LogControl,
) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    let token = config.service.resolve_token()?;
    let service = HttpDeviceService::new(config.service.base_url.as_str(), token)
        .context("Failed to create service client")?;
    let client = RemoteClient::new(service, config.service.device_type_id.as_str())
        .with_log_control(log_control);
    let results_path = results_override.or_else(|| config.results_path.clone());

    match &config.runner {
        RunnerConfig::Instrumentation(runner) => {
            let test_path = config
                .test
                .test_path
                .clone()
                .context("test.test_path is required by the instrumentation runner")?;
            let variant = InstrumentationVariant::new(
                config.test.suite.as_str(),
                config.test.app_path.as_path(),
                test_path,
                runner.runner_package.as_str(),
            )?
            .with_environment(runner.environment.clone())
            .with_data_deps(config.test.data_deps.clone())
            .with_extra_apks(config.test.extra_apks.clone())
            .with_capture(config.capture.clone());
            run_with(&config, client, variant, mode, results_path).await
        }
        RunnerConfig::UiRobot(runner) => {
            let variant =
                UiRobotVariant::new(config.test.suite.as_str(), config.test.app_path.as_path())?
                    .with_runner_type(runner.runner_type.as_str())
                    .with_minutes(runner.minutes)
                    .with_capture(config.capture.clone());
            run_with(&config, client, variant, mode, results_path).await
        }
    }
}

async fn run_with<S, V>(
    config: &Config,
    client: RemoteClient<S>,
    variant: V,
    mode: RunMode,
    results_path: Option<PathBuf>,
) -> Result<()>
where
    S: DeviceService,
    V: RunVariant,
{
    info!("Using service: {}", client.service().name());
    info!("Using runner: {}", variant.name());

    let cancel = CancellationToken::new();
    let poller = StatusPoller::new(config.timeouts.clone())
        .with_wait_interval(config.poll.wait_interval())
        .with_heartbeat_interval(config.poll.heartbeat_interval())
        .with_cancellation_token(cancel.clone());

    let mut run = RemoteDeviceTestRun::new(client, variant, mode, poller);
    if let Some(path) = results_path {
        run = run.with_results_path(path);
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping test run");
            cancel.cancel();
        }
    });
    let outcome = run.run().await;
    interrupt.abort();

    match outcome {
        Ok(None) => {
            info!(
                "Triggered test run {}; state written to {}",
                run.run_id(),
                run.mode().state_path().display()
            );
            Ok(())
        }
        Ok(Some(results)) => {
            report::print_summary(&results);
            if !results.did_all_pass() {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) if e.is_infra_error() => {
            report::print_infra_error(&e);
            std::process::exit(INFRA_ERROR_EXIT_CODE);
        }
        Err(e) => Err(e.into()),
    }
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Service: {}", config.service.base_url);
            println!("  Device type: {}", config.service.device_type_id);
            println!("  Suite: {}", config.test.suite);
            let runner = match &config.runner {
                RunnerConfig::Instrumentation(_) => "instrumentation",
                RunnerConfig::UiRobot(_) => "uirobot",
            };
            println!("  Runner: {}", runner);
            println!("  Poll interval: {}s", config.poll.wait_interval_secs);
            if let Some(path) = &config.results_path {
                println!("  Results: {}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
