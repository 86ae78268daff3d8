//! svcwatch keeps a configured set of system services alive. On every tick it reloads its
//! configuration, checks each service's dependencies, restarts services it finds stopped and
//! mails an alert when a dependency is down or a restart does not bring a service back.

/// Cancellation shared with the monitoring thread.
pub mod cancel;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Dependency checks.
pub mod dependency;

/// Error handling.
pub mod error;

/// Logging setup.
pub mod logs;

/// Monitoring loop and its control handle.
pub mod monitor;

/// Alert delivery.
pub mod notify;

/// Service manager access.
pub mod probe;

/// Tick reports and outcomes.
pub mod status;

#[doc(hidden)]
pub mod test_utils;

pub use monitor::{MonitorHandle, cancel, start};
