use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use svcwatch::{
    monitor::{LoopState, Monitor, MonitorHandle},
    notify::{Credentials, NotificationDispatcher},
    probe::ServiceState,
    status::{Outcome, ReportSink, TickReport},
    test_utils::{FakeServices, ProbeCall, RecordingNotifier, RestartBehavior},
};
use tempfile::tempdir;

/// Counts ticks and optionally rewrites the config file after the first one.
struct TickCounter {
    ticks: AtomicUsize,
    rewrite: Option<(PathBuf, String)>,
}

impl TickCounter {
    fn new(rewrite: Option<(PathBuf, String)>) -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicUsize::new(0),
            rewrite,
        })
    }

    fn count(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl ReportSink for TickCounter {
    fn report(&self, _report: &TickReport) {
        let previous = self.ticks.fetch_add(1, Ordering::SeqCst);
        if previous == 0
            && let Some((path, content)) = &self.rewrite
        {
            fs::write(path, content).expect("failed to rewrite config");
        }
    }
}

fn spawn_monitor(
    config: &Path,
    probe: &FakeServices,
    notifier: &RecordingNotifier,
    sink: Arc<TickCounter>,
) -> MonitorHandle {
    let dispatcher = NotificationDispatcher::new(
        notifier.clone(),
        Credentials::new("ops@example.com", "pw", "oncall@example.com"),
    );
    Monitor::new(config, probe.clone(), dispatcher)
        .with_sink(sink)
        .spawn()
}

fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn cancel_during_sleep_stops_before_next_reload() {
    let dir = tempdir().expect("failed to create tempdir");
    let config = dir.path().join("services.yaml");
    fs::write(
        &config,
        "monitoring_interval_seconds: 3600\nservices:\n  - name: web\n",
    )
    .unwrap();

    let probe = FakeServices::new().with("web", ServiceState::Running);
    let notifier = RecordingNotifier::new();
    let counter = TickCounter::new(None);
    let mut handle = spawn_monitor(&config, &probe, &notifier, counter.clone());

    assert!(wait_for(Duration::from_secs(5), || {
        handle.state() == LoopState::Sleeping
    }));
    assert_eq!(counter.count(), 1);

    let cancelled_at = Instant::now();
    svcwatch::cancel(&handle);
    handle.join();

    assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.state(), LoopState::Stopped);
    assert!(handle.is_finished());
    assert_eq!(counter.count(), 1);
    assert_eq!(probe.calls(), vec![ProbeCall::Status("web".into())]);
}

#[test]
fn interval_change_applies_from_next_sleep() {
    let dir = tempdir().expect("failed to create tempdir");
    let config = dir.path().join("services.yaml");
    fs::write(
        &config,
        "monitoring_interval_seconds: 1\nservices:\n  - name: web\n",
    )
    .unwrap();

    let probe = FakeServices::new().with("web", ServiceState::Running);
    let notifier = RecordingNotifier::new();
    let counter = TickCounter::new(Some((
        config.clone(),
        "monitoring_interval_seconds: 3600\nservices:\n  - name: web\n".into(),
    )));
    let mut handle = spawn_monitor(&config, &probe, &notifier, counter.clone());

    // The first sleep still uses the interval loaded before the edit.
    assert!(wait_for(Duration::from_secs(5), || counter.count() >= 2));

    // The second tick loaded the long interval, so no third tick follows.
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(counter.count(), 2);

    handle.cancel();
    handle.join();
    assert_eq!(handle.state(), LoopState::Stopped);
}

#[test]
fn unreadable_config_keeps_loop_alive() {
    let dir = tempdir().expect("failed to create tempdir");
    let config = dir.path().join("missing.yaml");

    let probe = FakeServices::new();
    let notifier = RecordingNotifier::new();
    let counter = TickCounter::new(None);
    let mut handle = spawn_monitor(&config, &probe, &notifier, counter.clone());

    assert!(wait_for(Duration::from_secs(5), || {
        handle.state() == LoopState::Sleeping
    }));
    assert!(probe.calls().is_empty());
    assert!(notifier.sent().is_empty());
    assert!(handle.last_outcome().is_some_and(|o| o.is_error()));

    handle.cancel();
    handle.join();
    assert_eq!(counter.count(), 1);
}

#[test]
fn last_outcome_reports_restart_failure() {
    let dir = tempdir().expect("failed to create tempdir");
    let config = dir.path().join("services.yaml");
    fs::write(
        &config,
        "monitoring_interval_seconds: 3600\nservices:\n  - name: worker\n",
    )
    .unwrap();

    let probe = FakeServices::new()
        .with("worker", ServiceState::Stopped)
        .on_restart("worker", RestartBehavior::Reject("Unit worker.service is masked.".into()));
    let notifier = RecordingNotifier::new();
    let counter = TickCounter::new(None);
    let mut handle = spawn_monitor(&config, &probe, &notifier, counter.clone());

    assert!(wait_for(Duration::from_secs(5), || counter.count() == 1));
    assert_eq!(
        handle.last_outcome(),
        Some(Outcome::Error(
            "Error: Failed to restart worker: Unit worker.service is masked.".into()
        ))
    );
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(probe.restarts_of("worker"), 1);

    handle.cancel();
    handle.join();
}

#[test]
fn start_message_is_reported_before_first_tick_completes() {
    let dir = tempdir().expect("failed to create tempdir");
    let config = dir.path().join("services.yaml");
    fs::write(&config, "services: []\n").unwrap();

    let probe = FakeServices::new();
    let notifier = RecordingNotifier::new();
    let dispatcher = NotificationDispatcher::new(notifier, Credentials::default());
    let monitor = Monitor::new(&config, probe, dispatcher);
    assert_eq!(monitor.state(), LoopState::Idle);

    let mut handle = monitor.spawn();
    let outcome = handle.last_outcome().expect("outcome present");
    assert!(matches!(
        outcome,
        Outcome::Success(ref message)
            if message == "Monitoring started successfully" || message == "Checked 0 service(s)"
    ));
    handle.cancel();
    handle.join();
    assert_eq!(handle.state(), LoopState::Stopped);
}
