use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    error::MonitorError,
    notify::{NotificationRequest, Notifier},
    probe::{ServiceControl, ServiceState},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A call made against `FakeServices`, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCall {
    Status(String),
    Restart(String),
}

/// What a scripted restart does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartBehavior {
    /// The command succeeds and the service becomes running.
    Recover,
    /// The command succeeds but the service stays in its current state.
    NoEffect,
    /// The command is rejected with the given reason.
    Reject(String),
}

#[derive(Debug, Default)]
struct FakeState {
    states: HashMap<String, ServiceState>,
    restarts: HashMap<String, RestartBehavior>,
    calls: Vec<ProbeCall>,
}

/// In-memory service manager. Clones share state so tests can inspect a probe handed to the
/// monitor.
#[derive(Debug, Clone, Default)]
pub struct FakeServices {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, service: &str, state: ServiceState) -> Self {
        self.set_state(service, state);
        self
    }

    pub fn on_restart(self, service: &str, behavior: RestartBehavior) -> Self {
        lock(&self.inner)
            .restarts
            .insert(service.to_string(), behavior);
        self
    }

    pub fn set_state(&self, service: &str, state: ServiceState) {
        lock(&self.inner).states.insert(service.to_string(), state);
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn restarts_of(&self, service: &str) -> usize {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|call| matches!(call, ProbeCall::Restart(name) if name == service))
            .count()
    }
}

impl ServiceControl for FakeServices {
    fn status(&self, service: &str) -> Result<ServiceState, MonitorError> {
        let mut inner = lock(&self.inner);
        inner.calls.push(ProbeCall::Status(service.to_string()));
        inner
            .states
            .get(service)
            .copied()
            .ok_or_else(|| MonitorError::ServiceNotFound(service.to_string()))
    }

    fn restart(&self, service: &str) -> Result<(), MonitorError> {
        let mut inner = lock(&self.inner);
        inner.calls.push(ProbeCall::Restart(service.to_string()));
        let behavior = inner
            .restarts
            .get(service)
            .cloned()
            .unwrap_or(RestartBehavior::Recover);

        match behavior {
            RestartBehavior::Recover => {
                if !inner.states.contains_key(service) {
                    return Err(MonitorError::RestartFailed {
                        service: service.to_string(),
                        reason: format!("Unit {service}.service not found."),
                    });
                }
                inner
                    .states
                    .insert(service.to_string(), ServiceState::Running);
                Ok(())
            }
            RestartBehavior::NoEffect => Ok(()),
            RestartBehavior::Reject(reason) => Err(MonitorError::RestartFailed {
                service: service.to_string(),
                reason,
            }),
        }
    }
}

/// A message captured by `RecordingNotifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAlert {
    pub subject: String,
    pub body: String,
    pub recipient: String,
}

/// Notifier that records every send attempt and optionally fails all of them.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentAlert>>>,
    failure: Option<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(reason.to_string()),
        }
    }

    /// Every attempted send, including failed ones.
    pub fn sent(&self) -> Vec<SentAlert> {
        lock(&self.sent).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, request: &NotificationRequest<'_>) -> Result<(), MonitorError> {
        lock(&self.sent).push(SentAlert {
            subject: request.subject.to_string(),
            body: request.body.to_string(),
            recipient: request.credentials.recipient.clone(),
        });

        match &self.failure {
            Some(reason) => Err(MonitorError::NotifyFailed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}
