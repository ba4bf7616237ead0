//! Configuration loading and schema definitions for devrun.
//!
//! Loading parses the TOML document, expands `~` in every path and checks
//! the settings the runner variant needs, so a loaded [`Config`] can be
//! turned into a run without further validation.

pub mod schema;

pub use schema::*;

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Loads devrun configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, does not
/// match the schema, or fails validation.
///
/// # Example
///
/// ```no_run
/// use devrun::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("devrun.toml"))?;
/// println!("Device type: {}", config.service.device_type_id);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    prepare(config).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Loads devrun configuration from a TOML string.
///
/// # Errors
///
/// Same as [`load_config`], minus the file access.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    prepare(config)
}

fn prepare(mut config: Config) -> Result<Config> {
    expand_paths(&mut config);
    validate(&mut config)?;
    Ok(config)
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn expand_paths(config: &mut Config) {
    let test = &mut config.test;
    test.app_path = expand(&test.app_path);
    if let Some(test_path) = &test.test_path {
        test.test_path = Some(expand(test_path));
    }
    for dep in &mut test.data_deps {
        dep.host_path = expand(&dep.host_path);
    }
    for apk in &mut test.extra_apks {
        *apk = expand(apk);
    }
    if let Some(results_path) = &config.results_path {
        config.results_path = Some(expand(results_path));
    }
}

fn validate(config: &mut Config) -> Result<()> {
    if config.service.device_type_id.trim().is_empty() {
        bail!("service.device_type_id must not be empty");
    }
    if config.service.base_url.trim().is_empty() {
        bail!("service.base_url must not be empty");
    }
    if config.test.suite.trim().is_empty() {
        bail!("test.suite must not be empty");
    }

    match &config.runner {
        RunnerConfig::Instrumentation(runner) => {
            if config.test.test_path.is_none() {
                bail!("test.test_path is required by the instrumentation runner");
            }
            if runner.runner_package.trim().is_empty() {
                bail!("runner.runner_package must not be empty");
            }
        }
        RunnerConfig::UiRobot(runner) => {
            if runner.minutes == 0 {
                bail!("runner.minutes must be at least 1");
            }
        }
    }

    if config.poll.wait_interval_secs == 0 {
        bail!("poll.wait_interval_secs must be at least 1");
    }
    config.timeouts.ensure_unknown();
    Ok(())
}

impl ServiceConfig {
    /// The access token: `api_token` if set, else the `api_token_env`
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if neither is set.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.api_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }
        env::var(&self.api_token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .with_context(|| {
                format!(
                    "No API token: set service.api_token or the {} environment variable",
                    self.api_token_env
                )
            })
    }
}
