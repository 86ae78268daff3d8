//! Service status queries and restarts through the operating system's service manager.
use regex::Regex;
use serde::Serialize;
use std::{
    io::Read,
    process::{Child, Command, ExitStatus, Stdio},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::error::MonitorError;

/// Default upper bound for a single `systemctl restart` invocation.
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(90);

/// Observed state of a service at one point in time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    Running,
    Stopped,
    Unknown,
}

impl ServiceState {
    /// Only `Running` satisfies a dependency or skips a restart.
    pub fn is_running(self) -> bool {
        self == ServiceState::Running
    }
}

/// Access to the service manager.
///
/// `status` must be free of side effects. `restart` is the only mutating call and carries no
/// retry of its own.
pub trait ServiceControl: Send + Sync {
    /// Returns the current state, or `ServiceNotFound` if the manager has no such unit.
    fn status(&self, service: &str) -> Result<ServiceState, MonitorError>;

    /// Issues one restart command.
    fn restart(&self, service: &str) -> Result<(), MonitorError>;
}

/// `ServiceControl` backed by systemd's `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlProbe {
    user: bool,
    restart_timeout: Duration,
}

impl Default for SystemctlProbe {
    fn default() -> Self {
        Self {
            user: false,
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
        }
    }
}

impl SystemctlProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets the per-user manager (`systemctl --user`).
    pub fn user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    /// Upper bound for one `systemctl restart`; the command is killed after it.
    pub fn restart_timeout(mut self, timeout: Duration) -> Self {
        self.restart_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("systemctl");
        if self.user {
            cmd.arg("--user");
        }
        cmd
    }
}

fn unit_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9:_.@\\-]*$").expect("unit name pattern is valid")
    })
}

/// Whether `name` can be handed to `systemctl` as a unit name.
fn is_unit_name(name: &str) -> bool {
    unit_name_pattern().is_match(name)
}

/// Fields of interest from `systemctl show`.
#[derive(Debug, Default, PartialEq, Eq)]
struct UnitProperties {
    load_state: String,
    active_state: String,
    sub_state: String,
}

fn parse_show_output(stdout: &str) -> UnitProperties {
    let mut props = UnitProperties::default();
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "LoadState" => props.load_state = value,
                "ActiveState" => props.active_state = value,
                "SubState" => props.sub_state = value,
                _ => {}
            }
        }
    }
    props
}

fn classify(service: &str, props: &UnitProperties) -> Result<ServiceState, MonitorError> {
    if props.load_state == "not-found" || props.load_state.is_empty() {
        return Err(MonitorError::ServiceNotFound(service.to_string()));
    }

    let state = match props.active_state.as_str() {
        "active" | "reloading" => ServiceState::Running,
        "inactive" | "failed" => ServiceState::Stopped,
        _ => ServiceState::Unknown,
    };
    debug!(
        "Service '{service}' is {}/{} ({state})",
        props.active_state, props.sub_state
    );
    Ok(state)
}

/// Wait for a child process with a timeout, returning `Ok(None)` on timeout.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

impl ServiceControl for SystemctlProbe {
    fn status(&self, service: &str) -> Result<ServiceState, MonitorError> {
        if !is_unit_name(service) {
            debug!("'{service}' is not a valid unit name");
            return Err(MonitorError::ServiceNotFound(service.to_string()));
        }

        let output = self
            .command()
            .arg("show")
            .arg("--property=LoadState,ActiveState,SubState")
            .arg("--")
            .arg(service)
            .output();

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                warn!("Failed to query status of '{service}': {err}");
                return Ok(ServiceState::Unknown);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "systemctl show for '{service}' exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
            return Ok(ServiceState::Unknown);
        }

        classify(
            service,
            &parse_show_output(&String::from_utf8_lossy(&output.stdout)),
        )
    }

    fn restart(&self, service: &str) -> Result<(), MonitorError> {
        let failed = |reason: String| MonitorError::RestartFailed {
            service: service.to_string(),
            reason,
        };

        if !is_unit_name(service) {
            return Err(failed(format!("'{service}' is not a valid unit name")));
        }

        let mut child = self
            .command()
            .arg("restart")
            .arg("--")
            .arg(service)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("could not run systemctl: {e}")))?;

        let status = match wait_with_timeout(&mut child, self.restart_timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                if let Err(err) = child.kill() {
                    warn!("Failed to terminate timed-out restart of '{service}': {err}");
                }
                let _ = child.wait();
                return Err(failed(format!(
                    "timed out after {}s",
                    self.restart_timeout.as_secs()
                )));
            }
            Err(err) => return Err(failed(err.to_string())),
        };

        if status.success() {
            return Ok(());
        }

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let reason = match stderr.trim() {
            "" => format!("systemctl exited with {:?}", status.code()),
            message => message.to_string(),
        };
        Err(failed(reason))
    }
}
