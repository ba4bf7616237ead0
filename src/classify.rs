//! Classification of completed runs.
//!
//! A failed run on a device farm can mean the test failed, the app crashed,
//! or the device fell off the farm. Only the first two are the test's fault.
//! The service does not say which, so the classifier reads the runner output
//! and the logs in the results archive:
//!
//! | Evidence | Outcome |
//! |----------|---------|
//! | `pass` is true | [`ResultKind::Pass`] |
//! | output has a short-message marker and a long-message marker | [`ResultKind::Crash`] |
//! | output has a short-message marker only | [`ResultKind::Unknown`] (platform error) |
//! | trace log says the device was not found | [`RunError::DeviceOffline`] |
//! | anything else | [`ResultKind::Unknown`] (service-detected error) |
//!
//! The markers are heuristics and live in [`ClassifierPatterns`].

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::error;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{RunError, RunResult};
use crate::poller::RunResults;

/// Marker printed by the platform when the app under test crashed.
pub const SHORT_MSG_PATTERN: &str = "shortMsg=";

/// Marker preceding the crash signature.
pub const LONG_MSG_PATTERN: &str = "longMsg=";

/// Trace log line written when the device disappeared.
pub const DEVICE_OFFLINE_PATTERN: &str = "error: device not found";

/// Archive entry holding the device log.
pub const DEVICE_LOG_ENTRY: &str = "appurify_results/logcat.txt";

/// Archive entry holding the device bridge trace log.
pub const TRACE_LOG_ENTRY: &str = "adb_trace.log";

/// Message of a crash report that carries no signature.
pub const UNKNOWN_PLATFORM_ERROR: &str = "Unknown platform error detected.";

/// Message of a failure with no crash or device evidence.
pub const SERVICE_DETECTED_ERROR: &str = "Remote Service detected error.";

/// The kind of a classified result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultKind {
    /// The run passed.
    Pass,
    /// The test failed with a message.
    Fail { message: String },
    /// The app crashed; `signature` identifies the crash.
    Crash { signature: String },
    /// Something went wrong that could not be attributed further.
    Unknown { message: String },
}

/// A named outcome of a remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedResult {
    pub name: String,
    #[serde(flatten)]
    pub kind: ResultKind,
}

impl ClassifiedResult {
    pub fn new(name: impl Into<String>, kind: ResultKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.kind, ResultKind::Pass)
    }
}

/// All results produced by one collect invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedResults {
    results: Vec<ClassifiedResult>,
}

impl ClassifiedResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: ClassifiedResult) {
        self.results.push(result);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.passed()
    }

    /// `true` if there is at least one result and all of them passed.
    pub fn did_all_pass(&self) -> bool {
        !self.is_empty() && self.failed() == 0
    }
}

impl From<ClassifiedResult> for ClassifiedResults {
    fn from(result: ClassifiedResult) -> Self {
        Self {
            results: vec![result],
        }
    }
}

/// Read access to a downloaded results archive.
#[derive(Debug, Clone)]
pub struct ResultsArchive {
    path: PathBuf,
}

impl ResultsArchive {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads an entry as lossy UTF-8. Returns `Ok(None)` if the entry is not
    /// in the archive.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, and
    /// [`RunError::CorruptResults`] if it is not a readable zip archive.
    pub fn read_entry(&self, name: &str) -> RunResult<Option<String>> {
        let file = fs::File::open(&self.path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| self.corrupt(e))?;
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(self.corrupt(e)),
        };
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn corrupt(&self, err: ZipError) -> RunError {
        RunError::CorruptResults(format!("{}: {}", self.path.display(), err))
    }
}

/// Patterns driving [`ResultClassifier`].
#[derive(Debug, Clone)]
pub struct ClassifierPatterns {
    pub short_msg: Regex,
    pub long_msg: Regex,
    pub device_offline: Regex,
}

impl ClassifierPatterns {
    /// Compiles custom patterns.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Configuration`] if a pattern is not a valid regex.
    pub fn new(short_msg: &str, long_msg: &str, device_offline: &str) -> RunResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                RunError::Configuration(format!("invalid classifier pattern '{}': {}", pattern, e))
            })
        };
        Ok(Self {
            short_msg: compile(short_msg)?,
            long_msg: compile(long_msg)?,
            device_offline: compile(device_offline)?,
        })
    }

    /// The markers written by the Android platform and adb.
    ///
    /// # Errors
    ///
    /// Only fails if the built-in patterns stop compiling.
    pub fn standard() -> RunResult<Self> {
        Self::new(SHORT_MSG_PATTERN, LONG_MSG_PATTERN, DEVICE_OFFLINE_PATTERN)
    }
}

/// Turns a failed run's output and logs into a [`ClassifiedResult`].
#[derive(Debug, Clone)]
pub struct ResultClassifier {
    patterns: ClassifierPatterns,
}

impl ResultClassifier {
    pub fn new(patterns: ClassifierPatterns) -> Self {
        Self { patterns }
    }

    /// A classifier using [`ClassifierPatterns::standard`].
    ///
    /// # Errors
    ///
    /// See [`ClassifierPatterns::standard`].
    pub fn standard() -> RunResult<Self> {
        Ok(Self::new(ClassifierPatterns::standard()?))
    }

    /// Classifies the results of a completed run named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::DeviceOffline`] when the trace log shows the
    /// device was lost, or an I/O error if the archive cannot be read while
    /// looking for that evidence.
    pub fn classify(
        &self,
        name: &str,
        results: &RunResults,
        archive: &ResultsArchive,
    ) -> RunResult<ClassifiedResult> {
        if results.pass {
            return Ok(ClassifiedResult::new(name, ResultKind::Pass));
        }

        let output = &results.output;
        if output.lines().any(|l| self.patterns.short_msg.is_match(l)) {
            log_device_log(archive);
            let kind = match self.crash_signature(output) {
                Some(signature) => ResultKind::Crash { signature },
                None => ResultKind::Unknown {
                    message: UNKNOWN_PLATFORM_ERROR.to_string(),
                },
            };
            return Ok(ClassifiedResult::new(name, kind));
        }

        if self.did_device_go_offline(archive)? {
            log_device_log(archive);
            log_trace_log(archive);
            return Err(RunError::DeviceOffline);
        }

        Ok(ClassifiedResult::new(
            name,
            ResultKind::Unknown {
                message: SERVICE_DETECTED_ERROR.to_string(),
            },
        ))
    }

    /// Text after the long-message marker on the first line carrying it.
    fn crash_signature(&self, output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            self.patterns
                .long_msg
                .find(line)
                .map(|m| line[m.end()..].trim().to_string())
        })
    }

    fn did_device_go_offline(&self, archive: &ResultsArchive) -> RunResult<bool> {
        let Some(trace) = archive.read_entry(TRACE_LOG_ENTRY)? else {
            return Ok(false);
        };
        Ok(trace
            .lines()
            .any(|l| self.patterns.device_offline.is_match(l)))
    }
}

/// Logs the device log at error level. A missing log is reported, not fatal.
fn log_device_log(archive: &ResultsArchive) {
    match archive.read_entry(DEVICE_LOG_ENTRY) {
        Ok(Some(log)) => {
            let printable: String = log
                .chars()
                .filter(|c| c.is_ascii_graphic() || c.is_ascii_whitespace())
                .collect();
            for line in printable.lines() {
                error!("{}", line);
            }
        }
        Ok(None) => error!("No logcat found."),
        Err(e) => error!("Unable to read logcat from {}: {}", archive.path().display(), e),
    }
}

fn log_trace_log(archive: &ResultsArchive) {
    match archive.read_entry(TRACE_LOG_ENTRY) {
        Ok(Some(log)) => {
            for line in log.lines() {
                error!("{}", line);
            }
        }
        Ok(None) => error!("No adb trace log found."),
        Err(e) => error!("Unable to read adb trace log: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::zip_bytes;
    use tempfile::TempDir;

    fn archive(dir: &TempDir, entries: &[(&str, &str)]) -> ResultsArchive {
        let path = dir.path().join("results");
        fs::write(&path, zip_bytes(entries)).unwrap();
        ResultsArchive::open(path)
    }

    fn failed(output: &str) -> RunResults {
        RunResults {
            pass: false,
            output: output.to_string(),
            exception: None,
            url: String::new(),
        }
    }

    fn classifier() -> ResultClassifier {
        ResultClassifier::standard().unwrap()
    }

    #[test]
    fn test_pass() {
        let dir = TempDir::new().unwrap();
        let results = RunResults {
            pass: true,
            ..failed("")
        };

        let result = classifier()
            .classify("suite", &results, &archive(&dir, &[]))
            .unwrap();

        assert_eq!(result, ClassifiedResult::new("suite", ResultKind::Pass));
    }

    #[test]
    fn test_crash_signature_from_long_message() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir, &[(DEVICE_LOG_ENTRY, "E/AndroidRuntime: FATAL")]);
        let output = "INSTRUMENTATION_RESULT: shortMsg=Process crashed.\n\
                      INSTRUMENTATION_RESULT: longMsg=SIG123\n\
                      INSTRUMENTATION_CODE: 0";

        let result = classifier()
            .classify("suite", &failed(output), &archive)
            .unwrap();

        assert_eq!(
            result.kind,
            ResultKind::Crash {
                signature: "SIG123".to_string()
            }
        );
        assert!(!result.is_success());
    }

    #[test]
    fn test_short_message_without_long_message_is_platform_error() {
        let dir = TempDir::new().unwrap();
        // No logcat in the archive: logged, not fatal.
        let archive = archive(&dir, &[]);

        let result = classifier()
            .classify("suite", &failed("shortMsg=Native crash"), &archive)
            .unwrap();

        assert_eq!(
            result.kind,
            ResultKind::Unknown {
                message: UNKNOWN_PLATFORM_ERROR.to_string()
            }
        );
    }

    #[test]
    fn test_device_offline_is_infra_error() {
        let dir = TempDir::new().unwrap();
        let archive = archive(
            &dir,
            &[(TRACE_LOG_ENTRY, "adb: waiting\nerror: device not found\n")],
        );

        let err = classifier()
            .classify("suite", &failed("Test run failed"), &archive)
            .unwrap_err();

        assert!(matches!(err, RunError::DeviceOffline));
        assert!(err.is_infra_error());
    }

    #[test]
    fn test_other_failures_are_service_detected() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir, &[(TRACE_LOG_ENTRY, "all good\n")]);

        let result = classifier()
            .classify("suite", &failed("Test run failed"), &archive)
            .unwrap();

        assert_eq!(
            result.kind,
            ResultKind::Unknown {
                message: SERVICE_DETECTED_ERROR.to_string()
            }
        );
    }

    #[test]
    fn test_missing_trace_log_is_not_offline() {
        let dir = TempDir::new().unwrap();
        let result = classifier()
            .classify("suite", &failed("boom"), &archive(&dir, &[]))
            .unwrap();
        assert!(matches!(result.kind, ResultKind::Unknown { .. }));
    }

    #[test]
    fn test_non_zip_archive_is_infra_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results");
        fs::write(&path, "<html>502 Bad Gateway</html>").unwrap();

        let err = classifier()
            .classify("suite", &failed("Test run failed"), &ResultsArchive::open(path))
            .unwrap_err();

        assert!(matches!(err, RunError::CorruptResults(_)));
        assert!(err.is_infra_error());
    }

    #[test]
    fn test_custom_patterns() {
        let dir = TempDir::new().unwrap();
        let patterns = ClassifierPatterns::new("CRASH:", "SIGNATURE:", "lost device").unwrap();
        let output = "CRASH: yes\nSIGNATURE: abort()";

        let result = ResultClassifier::new(patterns)
            .classify("suite", &failed(output), &archive(&dir, &[]))
            .unwrap();

        assert_eq!(
            result.kind,
            ResultKind::Crash {
                signature: "abort()".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let err = ClassifierPatterns::new("(", "b", "c").unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_results_counts() {
        let mut results = ClassifiedResults::new();
        assert!(!results.did_all_pass());

        results.add(ClassifiedResult::new("a", ResultKind::Pass));
        assert!(results.did_all_pass());

        results.add(ClassifiedResult::new(
            "b",
            ResultKind::Fail {
                message: "assert".to_string(),
            },
        ));
        assert_eq!(results.passed(), 1);
        assert_eq!(results.failed(), 1);
        assert!(!results.did_all_pass());
    }
}
