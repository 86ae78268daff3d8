//! The monitoring loop: reload, evaluate every service, alert, sleep.
use chrono::Utc;
use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    thread,
};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    cancel::CancellationToken,
    config::{ServiceConfig, load_or_degrade},
    dependency::{DependencyCheck, DependencyEvaluator},
    error::{ErrorKind, MonitorError},
    notify::{Alert, Credentials, NotificationDispatcher, RelayConfig, SmtpNotifier},
    probe::{ServiceControl, ServiceState, SystemctlProbe},
    status::{
        AlertRecord, LatestOutcome, Outcome, ReportSink, ServiceOutcome, ServiceReport,
        TickReport, Transition,
    },
};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    Idle,
    Evaluating,
    Sleeping,
    Stopped,
}

/// Evaluates the configured services against a service manager and raises alerts.
pub struct Monitor {
    config_path: PathBuf,
    probe: Box<dyn ServiceControl>,
    dispatcher: NotificationDispatcher,
    sinks: Vec<Arc<dyn ReportSink>>,
    state: Arc<Mutex<LoopState>>,
}

impl Monitor {
    pub fn new(
        config_path: impl Into<PathBuf>,
        probe: impl ServiceControl + 'static,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            probe: Box::new(probe),
            dispatcher,
            sinks: Vec::new(),
            state: Arc::new(Mutex::new(LoopState::Idle)),
        }
    }

    /// Registers a sink that receives every finished tick.
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn state(&self) -> LoopState {
        *lock_state(&self.state)
    }

    fn set_state(&self, state: LoopState) {
        debug!("Monitor state -> {state}");
        *lock_state(&self.state) = state;
    }

    /// Status of `service`, with lookup failures folded into a state.
    fn observe(&self, service: &str) -> ServiceState {
        match self.probe.status(service) {
            Ok(state) => state,
            Err(err) if err.kind() == ErrorKind::ServiceNotFound => {
                warn!("Error checking {service}: {err}");
                ServiceState::Stopped
            }
            Err(err) => {
                error!("Error checking {service}: {err}");
                ServiceState::Unknown
            }
        }
    }

    fn alert(&self, alert: Alert) -> AlertRecord {
        let error = self.dispatcher.dispatch(&alert).err().map(|e| e.to_string());
        AlertRecord {
            subject: alert.subject,
            error,
        }
    }

    /// Runs the dependency check, probe and at most one restart for a single service.
    pub fn evaluate_service(&self, service: &ServiceConfig) -> ServiceReport {
        let name = service.name.as_str();

        let check = DependencyEvaluator::new(self.probe.as_ref()).all_satisfied(service);
        if let DependencyCheck::Unsatisfied { dependency, .. } = check {
            let alert = self.alert(Alert::dependency_failure(name, &dependency));
            return ServiceReport {
                service: name.to_string(),
                outcome: ServiceOutcome::DependencyFailed { dependency },
                transition: None,
                alert: Some(alert),
            };
        }

        let before = self.observe(name);
        if before.is_running() {
            info!("{name} is running.");
            return ServiceReport::running(name);
        }

        warn!("{name} is not running. Attempting to restart...");
        let restart = self.probe.restart(name);
        let after = self.observe(name);

        let transition = (before != after).then(|| {
            info!("{name} state changed from {before} to {after}");
            Transition {
                from: before,
                to: after,
            }
        });

        let failure = match restart {
            Err(MonitorError::RestartFailed { reason, .. }) => Some(reason),
            Err(err) => Some(err.to_string()),
            Ok(()) if !after.is_running() => Some(format!("service is {after} after restart")),
            Ok(()) => None,
        };

        match failure {
            Some(reason) => {
                error!("Failed to restart {name}: {reason}");
                let alert = self.alert(Alert::restart_failure(name, &reason));
                ServiceReport {
                    service: name.to_string(),
                    outcome: ServiceOutcome::RestartFailed { reason },
                    transition,
                    alert: Some(alert),
                }
            }
            None => {
                info!("Restarted {name} successfully.");
                ServiceReport {
                    service: name.to_string(),
                    outcome: ServiceOutcome::Recovered,
                    transition,
                    alert: None,
                }
            }
        }
    }

    /// One pass: reload the configuration and evaluate every service in order.
    ///
    /// Stops between services once `cancel` is raised.
    pub fn tick(&self, cancel: &CancellationToken) -> TickReport {
        let (config, config_error) = load_or_degrade(&self.config_path);
        let mut report = TickReport::new(Utc::now(), config.interval);
        report.config_error = config_error.map(|e| e.to_string());

        for service in &config.services {
            if cancel.is_cancelled() {
                info!("Cancellation requested; skipping remaining services");
                break;
            }
            report.services.push(self.evaluate_service(service));
        }

        debug!(
            "Tick finished: {} service(s), {} alert(s), {} restart(s)",
            report.services.len(),
            report.alerts().count(),
            report.restart_attempts()
        );
        report
    }

    /// Ticks until `cancel` is raised. Errors never end the loop.
    pub fn run(&self, cancel: &CancellationToken) {
        info!("Monitoring services from {:?}", self.config_path);

        while !cancel.is_cancelled() {
            self.set_state(LoopState::Evaluating);
            let report = self.tick(cancel);
            for sink in &self.sinks {
                sink.report(&report);
            }

            self.set_state(LoopState::Sleeping);
            debug!("Next check in {}s", report.interval_seconds);
            if cancel.wait_timeout(report.interval()) {
                break;
            }
        }

        self.set_state(LoopState::Stopped);
        info!("Monitoring stopped");
    }

    /// Moves the loop onto a background thread.
    pub fn spawn(mut self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let latest = Arc::new(LatestOutcome::new(Outcome::Success(
            "Monitoring started successfully".into(),
        )));
        let state = Arc::clone(&self.state);
        // Updated ahead of caller sinks so they can read the outcome of the tick they receive.
        self.sinks.insert(0, latest.clone());

        let token = cancel.clone();
        let thread = thread::spawn(move || self.run(&token));

        MonitorHandle {
            cancel,
            latest,
            state,
            thread: Some(thread),
        }
    }
}

fn lock_state(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Control handle for a monitoring run started with `start` or `Monitor::spawn`.
pub struct MonitorHandle {
    cancel: CancellationToken,
    latest: Arc<LatestOutcome>,
    state: Arc<Mutex<LoopState>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Asks the loop to stop. It exits within one sleep interval at most.
    pub fn cancel(&self) {
        info!("Stopping monitoring");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Outcome of the most recent tick, or the start message before the first one finishes.
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.latest.get()
    }

    pub fn state(&self) -> LoopState {
        *lock_state(&self.state)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Blocks until the loop has exited. Only returns after `cancel`.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Monitoring thread panicked");
        }
    }
}

/// Starts monitoring `config_path` with systemd and SMTP alerts on a background thread.
pub fn start(credentials: Credentials, config_path: impl Into<PathBuf>) -> MonitorHandle {
    let dispatcher =
        NotificationDispatcher::new(SmtpNotifier::new(RelayConfig::default()), credentials);
    Monitor::new(config_path, SystemctlProbe::new(), dispatcher).spawn()
}

/// Stops a run started with `start`.
pub fn cancel(handle: &MonitorHandle) {
    handle.cancel();
}
