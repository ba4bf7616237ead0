//! Behavioural tests for the devrun binary that need no device service.

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const CONFIG: &str = r#"
[service]
base_url = "http://127.0.0.1:9"
api_token = "test-token"
device_type_id = "587"

[test]
suite = "content_shell"
app_path = "ContentShell.apk"
test_path = "ContentShellTest.apk"

[runner]
type = "instrumentation"
runner_package = "org.chromium.Runner"
"#;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("devrun.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn help_lists_subcommands() {
    cargo_bin_cmd!("devrun")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("trigger"))
        .stdout(predicate::str::contains("collect"));
}

#[test]
fn validate_accepts_valid_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), CONFIG);

    cargo_bin_cmd!("devrun")
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Runner: instrumentation"));
}

#[test]
fn validate_rejects_missing_device_type() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), &CONFIG.replace("device_type_id = \"587\"", "device_type_id = \"\""));

    cargo_bin_cmd!("devrun")
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("device_type_id"));
}

#[test]
fn collect_with_invalid_state_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), CONFIG);
    let state = dir.path().join("state.json");
    fs::write(&state, "not json").unwrap();

    cargo_bin_cmd!("devrun")
        .arg("--config")
        .arg(&config)
        .arg("collect")
        .arg("--state")
        .arg(&state)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn collect_requires_state_argument() {
    cargo_bin_cmd!("devrun")
        .arg("collect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--state"));
}
