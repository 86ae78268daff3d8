//! Per-tick results and the most recent outcome surfaced to the caller.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use crate::probe::ServiceState;

/// Last success or error message, for a status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    Success(String),
    Error(String),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(message) | Outcome::Error(message) => message,
        }
    }
}

/// A status change observed while evaluating one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ServiceState,
    pub to: ServiceState,
}

/// What happened to one service during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ServiceOutcome {
    /// Already running; nothing done.
    Running,
    /// Skipped because a dependency is not running.
    DependencyFailed { dependency: String },
    /// Restarted and now running.
    Recovered,
    /// Restart rejected, or the service was still not running afterwards.
    RestartFailed { reason: String },
}

impl ServiceOutcome {
    pub fn restart_attempted(&self) -> bool {
        matches!(
            self,
            ServiceOutcome::Recovered | ServiceOutcome::RestartFailed { .. }
        )
    }
}

/// Delivery record for the alert raised for a service, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRecord {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AlertRecord {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub service: String,
    #[serde(flatten)]
    pub outcome: ServiceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertRecord>,
}

impl ServiceReport {
    pub fn running(service: &str) -> Self {
        Self {
            service: service.to_string(),
            outcome: ServiceOutcome::Running,
            transition: None,
            alert: None,
        }
    }

    fn error_message(&self) -> Option<String> {
        if let Some(error) = self.alert.as_ref().and_then(|a| a.error.as_ref()) {
            return Some(format!("Error: {error}"));
        }
        match &self.outcome {
            ServiceOutcome::DependencyFailed { dependency } => Some(format!(
                "Error: Dependency {dependency} of {} is not running",
                self.service
            )),
            ServiceOutcome::RestartFailed { reason } => Some(format!(
                "Error: Failed to restart {}: {reason}",
                self.service
            )),
            ServiceOutcome::Running | ServiceOutcome::Recovered => None,
        }
    }
}

/// Everything observed during one pass over the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    /// Sleep that follows this tick, as loaded during it.
    pub interval_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_error: Option<String>,
    pub services: Vec<ServiceReport>,
}

impl TickReport {
    pub fn new(started_at: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            started_at,
            interval_seconds: interval.as_secs(),
            config_error: None,
            services: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &AlertRecord> {
        self.services.iter().filter_map(|s| s.alert.as_ref())
    }

    pub fn alerts_failed(&self) -> usize {
        self.alerts().filter(|a| !a.delivered()).count()
    }

    pub fn restart_attempts(&self) -> usize {
        self.services
            .iter()
            .filter(|s| s.outcome.restart_attempted())
            .count()
    }

    pub fn transitions(&self) -> impl Iterator<Item = (&str, Transition)> {
        self.services
            .iter()
            .filter_map(|s| s.transition.map(|t| (s.service.as_str(), t)))
    }

    /// The latest error of the tick if there was one, otherwise a success summary.
    pub fn outcome(&self) -> Outcome {
        if let Some(err) = &self.config_error {
            return Outcome::Error(format!("Error: {err}"));
        }

        match self.services.iter().rev().find_map(ServiceReport::error_message) {
            Some(message) => Outcome::Error(message),
            None => Outcome::Success(format!(
                "Checked {} service(s)",
                self.services.len()
            )),
        }
    }
}

/// Receives every finished tick. Called on the monitoring thread.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &TickReport);
}

/// Keeps only the outcome of the most recent tick.
#[derive(Debug, Default)]
pub struct LatestOutcome {
    outcome: Mutex<Option<Outcome>>,
}

impl LatestOutcome {
    pub fn new(initial: Outcome) -> Self {
        Self {
            outcome: Mutex::new(Some(initial)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Outcome>> {
        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Option<Outcome> {
        self.slot().clone()
    }

    pub fn set(&self, outcome: Outcome) {
        *self.slot() = Some(outcome);
    }
}

impl ReportSink for LatestOutcome {
    fn report(&self, report: &TickReport) {
        self.set(report.outcome());
    }
}
