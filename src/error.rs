//! Error handling for svcwatch.
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Coarse classification of every error the monitor can observe.
///
/// The loop decides how to contain an error by its kind, never by its detailed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The configuration source could not be read, parsed or validated.
    ConfigUnavailable,
    /// The operating system does not know the probed service.
    ServiceNotFound,
    /// A restart command was rejected or timed out.
    RestartFailed,
    /// An alert could not be delivered.
    NotifyFailed,
}

/// Defines all possible errors that can occur while monitoring services.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigRead(#[from] std::io::Error),

    /// Error parsing the YAML (or JSON) configuration.
    #[error("Invalid config format: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The same service name appears twice in one configuration.
    #[error("Service '{0}' is declared more than once")]
    DuplicateService(String),

    /// Error when the dependency graph contains a cycle.
    #[error("Detected dependency cycle: {cycle}")]
    DependencyCycle {
        /// Human-readable cycle description (e.g. `a -> b -> a`).
        cycle: String,
    },

    /// The service manager has no unit with this name.
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    /// Error restarting a service.
    #[error("Failed to restart service '{service}': {reason}")]
    RestartFailed {
        /// The service name that failed to restart.
        service: String,
        /// What the service manager reported.
        reason: String,
    },

    /// Error delivering an alert.
    #[error("Failed to send notification: {reason}")]
    NotifyFailed {
        /// Transport, address or authentication failure description.
        reason: String,
    },
}

impl MonitorError {
    /// Returns the containment class for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::ConfigRead(_)
            | MonitorError::ConfigParse(_)
            | MonitorError::DuplicateService(_)
            | MonitorError::DependencyCycle { .. } => ErrorKind::ConfigUnavailable,
            MonitorError::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            MonitorError::RestartFailed { .. } => ErrorKind::RestartFailed,
            MonitorError::NotifyFailed { .. } => ErrorKind::NotifyFailed,
        }
    }

    pub(crate) fn notify(reason: impl Into<String>) -> Self {
        MonitorError::NotifyFailed {
            reason: reason.into(),
        }
    }
}
