//! Runner configuration documents.
//!
//! The service reads a small INI-like file per test: a global section with
//! capture options, then one section named after the runner type.
//!
//! ```text
//! [appurify]
//! network=1
//! pcap=0
//! profiler=0
//! videocapture=0
//! [robotium]
//! runner=org.chromium.test.Runner
//! host_test=ChromeTest.apk
//! sdcard_files=fonts.xml,media
//! ```
//!
//! Nothing is escaped. Keys may not contain `=` and neither keys nor values
//! may contain line breaks; the builder rejects such entries. Values may
//! contain `=` since the service splits each line on the first one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RunError, RunResult};
use crate::package::PackagedArtifact;

/// Name of the global section.
pub const GLOBAL_SECTION: &str = "appurify";

/// Network profile: wifi, one bar.
pub const WIFI_1_BAR: u32 = 1;

/// Global capture options applied to every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Network profile identifier.
    #[serde(default = "default_network")]
    pub network: u32,

    /// Record device network traffic.
    #[serde(default)]
    pub pcap: bool,

    /// Record CPU, memory and network usage.
    #[serde(default)]
    pub profiler: bool,

    /// Record video of the device screen.
    #[serde(default)]
    pub videocapture: bool,
}

fn default_network() -> u32 {
    WIFI_1_BAR
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            network: WIFI_1_BAR,
            pcap: false,
            profiler: false,
            videocapture: false,
        }
    }
}

/// An immutable runner configuration, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    capture: CaptureOptions,
    runner_type: String,
    settings: Vec<(String, String)>,
}

impl RunConfiguration {
    /// Starts a configuration for the given runner type.
    pub fn builder(runner_type: impl Into<String>) -> RunConfigurationBuilder {
        RunConfigurationBuilder {
            capture: CaptureOptions::default(),
            runner_type: runner_type.into(),
            settings: Vec::new(),
        }
    }

    /// Looks up a runner setting.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Runner settings in insertion order.
    pub fn settings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Renders the document in the service's text format.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", GLOBAL_SECTION)?;
        writeln!(f, "network={}", self.capture.network)?;
        writeln!(f, "pcap={}", u8::from(self.capture.pcap))?;
        writeln!(f, "profiler={}", u8::from(self.capture.profiler))?;
        writeln!(f, "videocapture={}", u8::from(self.capture.videocapture))?;
        writeln!(f, "[{}]", self.runner_type)?;
        for (key, value) in &self.settings {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Builder for [`RunConfiguration`].
#[derive(Debug, Clone)]
pub struct RunConfigurationBuilder {
    capture: CaptureOptions,
    runner_type: String,
    settings: Vec<(String, String)>,
}

impl RunConfigurationBuilder {
    /// Sets the global capture options.
    pub fn capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }

    /// Sets a runner setting. Setting an existing key replaces its value in
    /// place.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.settings.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.settings.push((key, value)),
        }
        self
    }

    /// Sets `environment_vars` to `K=V` pairs joined by commas. Does nothing
    /// for an empty map.
    pub fn environment(self, vars: &BTreeMap<String, String>) -> Self {
        if vars.is_empty() {
            return self;
        }
        let joined = vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        self.setting("environment_vars", joined)
    }

    /// Points the runner at the contents of a packaged archive.
    pub fn artifact(self, artifact: &PackagedArtifact) -> Self {
        let mut builder = self
            .setting("sdcard_files", artifact.sdcard_files.join(","))
            .setting("host_test", artifact.host_test.clone());
        if !artifact.additional_apks.is_empty() {
            builder = builder.setting("additional_apks", artifact.additional_apks.join(","));
        }
        builder
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Configuration`] for an empty or malformed runner
    /// type, keys containing `=`, or any line break in a key or value.
    pub fn build(self) -> RunResult<RunConfiguration> {
        if self.runner_type.is_empty() || has_line_break(&self.runner_type) {
            return Err(RunError::Configuration(format!(
                "invalid runner type: {:?}",
                self.runner_type
            )));
        }
        for (key, value) in &self.settings {
            if key.is_empty() || key.contains('=') || has_line_break(key) {
                return Err(RunError::Configuration(format!(
                    "invalid runner config key: {:?}",
                    key
                )));
            }
            if has_line_break(value) {
                return Err(RunError::Configuration(format!(
                    "runner config value for '{}' contains a line break",
                    key
                )));
            }
        }
        Ok(RunConfiguration {
            capture: self.capture,
            runner_type: self.runner_type,
            settings: self.settings,
        })
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains('\n') || s.contains('\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_layout() {
        let config = RunConfiguration::builder("robotium")
            .capture(CaptureOptions {
                network: 3,
                pcap: true,
                profiler: false,
                videocapture: true,
            })
            .setting("runner", "org.chromium.Runner")
            .setting("host_test", "ChromeTest.apk")
            .build()
            .unwrap();

        assert_eq!(
            config.render(),
            "[appurify]\n\
             network=3\n\
             pcap=1\n\
             profiler=0\n\
             videocapture=1\n\
             [robotium]\n\
             runner=org.chromium.Runner\n\
             host_test=ChromeTest.apk\n"
        );
    }

    #[test]
    fn test_default_capture_is_wifi_one_bar() {
        let config = RunConfiguration::builder("android_robot").build().unwrap();
        assert!(config.render().starts_with("[appurify]\nnetwork=1\npcap=0\n"));
        assert!(config.render().ends_with("[android_robot]\n"));
    }

    #[test]
    fn test_setting_replaces_in_place() {
        let config = RunConfiguration::builder("robotium")
            .setting("a", "1")
            .setting("b", "2")
            .setting("a", "3")
            .build()
            .unwrap();

        let settings: Vec<_> = config.settings().collect();
        assert_eq!(settings, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_environment_vars_joined() {
        let mut env = BTreeMap::new();
        env.insert("LANG".to_string(), "en_US".to_string());
        env.insert("DEBUG".to_string(), "1".to_string());

        let config = RunConfiguration::builder("robotium")
            .environment(&env)
            .build()
            .unwrap();

        assert_eq!(config.get("environment_vars"), Some("DEBUG=1,LANG=en_US"));
    }

    #[test]
    fn test_empty_environment_adds_nothing() {
        let config = RunConfiguration::builder("robotium")
            .environment(&BTreeMap::new())
            .build()
            .unwrap();
        assert_eq!(config.get("environment_vars"), None);
    }

    #[test]
    fn test_rejects_line_breaks_and_bad_keys() {
        let err = RunConfiguration::builder("robotium")
            .setting("runner", "a\nb=c")
            .build()
            .unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));

        let err = RunConfiguration::builder("robotium")
            .setting("a=b", "c")
            .build()
            .unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }
}
