//! Error types shared by every phase of a remote test run.
//!
//! Errors fall into two classes:
//!
//! - **Infrastructure** failures: the remote service, the network or the
//!   device is at fault (HTTP failures, poll timeouts, the device going
//!   offline). These are always fatal to the current phase.
//! - Everything else: local configuration problems, malformed responses and
//!   I/O errors.
//!
//! Application-level failures (a test crashed or failed) are never errors;
//! they are reported as [`crate::classify::ClassifiedResult`] values.

/// Result type for run operations.
pub type RunResult<T> = Result<T, RunError>;

/// Errors raised while triggering or collecting a remote test run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The service answered with a non-success HTTP status.
    #[error("{context} (HTTP {status})")]
    Http {
        /// HTTP status code returned by the service.
        status: u16,
        /// What the caller was trying to do.
        context: String,
    },

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered successfully but without the expected field.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The run stayed in one status for longer than its configured limit.
    #[error("Timeout while in {status} state for {elapsed_secs} seconds (limit {limit_secs}s)")]
    Timeout {
        /// Detailed status the run was stuck in.
        status: String,
        /// Seconds accumulated in that status.
        elapsed_secs: u64,
        /// Configured limit for that status.
        limit_secs: u64,
    },

    /// The device dropped off the service while the run was in progress.
    #[error("Remote service unable to reach device.")]
    DeviceOffline,

    /// The run result payload carried an internal exception.
    #[error("Remote service reported an exception: {0}")]
    RemoteException(String),

    /// The downloaded results archive could not be read as a zip file.
    #[error("Corrupt results archive: {0}")]
    CorruptResults(String),

    /// Polling was cancelled before the run completed.
    #[error("Polling cancelled before the run completed")]
    Cancelled,

    /// No test with the requested name exists on the service.
    #[error("No test found with name {0}")]
    TestNotFound(String),

    /// Invalid local configuration or persisted state.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failed to assemble the upload archive.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// I/O error on local files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Returns `true` when the failure is attributable to the service,
    /// network or device rather than to the test or local setup.
    pub fn is_infra_error(&self) -> bool {
        matches!(
            self,
            RunError::Http { .. }
                | RunError::Transport(_)
                | RunError::Timeout { .. }
                | RunError::DeviceOffline
                | RunError::RemoteException(_)
                | RunError::CorruptResults(_)
                | RunError::Cancelled
        )
    }
}

impl From<zip::result::ZipError> for RunError {
    fn from(value: zip::result::ZipError) -> Self {
        match value {
            zip::result::ZipError::Io(e) => RunError::Io(e),
            other => RunError::Packaging(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infra_classification() {
        assert!(
            RunError::Http {
                status: 500,
                context: "Unable to run test.".to_string()
            }
            .is_infra_error()
        );
        assert!(RunError::DeviceOffline.is_infra_error());
        assert!(
            RunError::Timeout {
                status: "queueing".to_string(),
                elapsed_secs: 605,
                limit_secs: 600,
            }
            .is_infra_error()
        );
        assert!(RunError::CorruptResults("not a zip".to_string()).is_infra_error());
        assert!(!RunError::Packaging("duplicate".to_string()).is_infra_error());
        assert!(!RunError::Configuration("bad".to_string()).is_infra_error());
        assert!(!RunError::TestNotFound("uirobot".to_string()).is_infra_error());
    }

    #[test]
    fn test_http_error_carries_status_and_context() {
        let err = RunError::Http {
            status: 403,
            context: "Unable to upload app.apk.".to_string(),
        };
        assert_eq!(err.to_string(), "Unable to upload app.apk. (HTTP 403)");
    }

    #[test]
    fn test_timeout_message_names_status() {
        let err = RunError::Timeout {
            status: "installing".to_string(),
            elapsed_secs: 15,
            limit_secs: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("installing"));
        assert!(msg.contains("15 seconds"));
    }
}
