//! State handed from the trigger phase to the collect phase.
//!
//! The two phases may run in different processes or on different machines;
//! the only thing they share is a small JSON file:
//!
//! ```json
//! {"test_run": {"test_run_id": "3a8f..."}}
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RunError, RunResult};

/// Persisted state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    test_run: TestRunState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TestRunState {
    test_run_id: String,
}

impl PersistedState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            test_run: TestRunState {
                test_run_id: run_id.into(),
            },
        }
    }

    /// The remote run identifier.
    pub fn run_id(&self) -> &str {
        &self.test_run.test_run_id
    }

    /// Reads the document written by a trigger invocation.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Configuration`] if the file cannot be read, is not
    /// a valid state document, or holds an empty run id.
    pub fn load(path: &Path) -> RunResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RunError::Configuration(format!(
                "Unable to read persisted state {}: {}",
                path.display(),
                e
            ))
        })?;

        let state: Self = serde_json::from_str(&content).map_err(|e| {
            RunError::Configuration(format!(
                "Invalid persisted state {}: {}",
                path.display(),
                e
            ))
        })?;

        if state.run_id().is_empty() {
            return Err(RunError::Configuration(format!(
                "Persisted state {} has no test run id",
                path.display()
            )));
        }

        debug!("Loaded test run id {} from {}", state.run_id(), path.display());
        Ok(state)
    }

    /// Writes the document, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn save(&self, path: &Path) -> RunResult<()> {
        let content = serde_json::to_string(self)
            .map_err(|e| RunError::Configuration(format!("Unable to encode state: {}", e)))?;
        fs::write(path, content)?;
        debug!("Saved test run id {} to {}", self.run_id(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        PersistedState::new("abc123").save(&path).unwrap();
        let loaded = PersistedState::load(&path).unwrap();

        assert_eq!(loaded.run_id(), "abc123");
    }

    #[test]
    fn test_document_shape() {
        let json = serde_json::to_value(PersistedState::new("abc123")).unwrap();
        assert_eq!(json, serde_json::json!({"test_run": {"test_run_id": "abc123"}}));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"stale\": true, \"padding\": \"xxxxxxxxxxxxxxxxxxxxxxxx\"}").unwrap();

        PersistedState::new("new-run").save(&path).unwrap();

        assert_eq!(PersistedState::load(&path).unwrap().run_id(), "new-run");
    }

    #[test]
    fn test_invalid_document_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        let err = PersistedState::load(&path).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));

        let err = PersistedState::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_empty_run_id_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"test_run": {"test_run_id": ""}}"#).unwrap();

        assert!(PersistedState::load(&path).is_err());
    }
}
