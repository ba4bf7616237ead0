//! Logging setup and scoped log sanitizing.
//!
//! Requests to the device service carry the API token and raw artifact
//! bytes. HTTP client crates log request details at `debug`/`trace`, so every
//! service call runs inside a [`SanitizeGuard`] that temporarily raises the
//! global filter to `warn` and restores the configured filter when dropped,
//! whether the call succeeded or not.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Filter applied while a service call is in flight.
const SANITIZED_DIRECTIVE: &str = "warn";

/// Verbosity at which sanitizing is switched off entirely.
const UNSANITIZED_VERBOSITY: u8 = 2;

/// Handle to the global log filter.
///
/// Cheap to clone. A `LogControl` created with [`LogControl::disabled`]
/// never touches the global subscriber, which is what library users and
/// tests want.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    directive: String,
    sanitize: bool,
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("directive", &self.directive)
            .field("sanitize", &self.sanitize)
            .finish()
    }
}

impl LogControl {
    /// A control that leaves the global filter alone.
    pub fn disabled() -> Self {
        Self {
            handle: None,
            directive: String::new(),
            sanitize: false,
        }
    }

    /// Returns `true` if service calls will have their logs suppressed.
    pub fn sanitizes(&self) -> bool {
        self.sanitize && self.handle.is_some()
    }

    /// Raises the global filter to `warn` until the returned guard drops.
    pub fn sanitize(&self) -> SanitizeGuard<'_> {
        let active = match &self.handle {
            Some(handle) if self.sanitize => handle
                .reload(EnvFilter::new(SANITIZED_DIRECTIVE))
                .is_ok(),
            _ => false,
        };
        SanitizeGuard {
            control: self,
            active,
        }
    }

    fn restore(&self) {
        if let Some(handle) = &self.handle {
            // Restoring can only fail if the subscriber is gone.
            let _ = handle.reload(EnvFilter::new(&self.directive));
        }
    }
}

/// Restores the configured log filter when dropped.
#[must_use = "logs are only suppressed while the guard is alive"]
pub struct SanitizeGuard<'a> {
    control: &'a LogControl,
    active: bool,
}

impl SanitizeGuard<'_> {
    /// Whether this guard actually changed the global filter.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for SanitizeGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.control.restore();
        }
    }
}

/// Maps a `-v` count to a filter directive.
///
/// `RUST_LOG` wins over the flag when set.
pub fn directive_for(verbosity: u8) -> String {
    if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV)
        && !env.trim().is_empty()
    {
        return env;
    }
    match verbosity {
        0 => "info".to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Installs the global subscriber and returns its [`LogControl`].
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(verbosity: u8) -> anyhow::Result<LogControl> {
    let directive = directive_for(verbosity);
    let (filter, handle) = reload::Layer::new(EnvFilter::new(&directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(LogControl {
        handle: Some(handle),
        directive,
        sanitize: verbosity < UNSANITIZED_VERBOSITY,
    })
}
