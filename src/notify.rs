//! Alert delivery over an SMTP relay.
use chrono::Local;
use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials as SmtpCredentials,
};
use std::{fmt, time::Duration};
use tracing::{debug, error, info, warn};

use crate::error::MonitorError;

/// Relay used when none is configured.
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
/// STARTTLS submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Mail account used to send alerts and the address that receives them.
///
/// Supplied once when monitoring starts and never reloaded with the service configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub sender: String,
    pub secret: String,
    pub recipient: String,
}

impl Credentials {
    pub fn new(
        sender: impl Into<String>,
        secret: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            secret: secret.into(),
            recipient: recipient.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("sender", &self.sender)
            .field("secret", &"<redacted>")
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// Where and how to reach the outbound mail relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
            timeout: Duration::from_secs(30),
        }
    }
}

/// An alert raised by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// A dependency of `service` was found not running.
    pub fn dependency_failure(service: &str, dependency: &str) -> Self {
        Self {
            subject: format!(
                "Service Alert: Dependency {dependency} of {service} is not running"
            ),
            body: stamped(format!(
                "The {dependency} service is not running, required by {service}."
            )),
        }
    }

    /// `service` could not be brought back to running.
    pub fn restart_failure(service: &str, reason: &str) -> Self {
        Self {
            subject: format!("Service Alert: {service} restart failed"),
            body: stamped(format!("Failed to restart {service}: {reason}")),
        }
    }
}

fn stamped(text: String) -> String {
    format!("{text}\n\nObserved at {}.", Local::now().to_rfc2822())
}

/// One message ready for delivery.
#[derive(Debug)]
pub struct NotificationRequest<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    pub credentials: &'a Credentials,
}

/// Outbound channel for alerts.
pub trait Notifier: Send + Sync {
    fn send(&self, request: &NotificationRequest<'_>) -> Result<(), MonitorError>;
}

/// Sends each alert as a plain-text mail over a fresh STARTTLS connection.
#[derive(Debug, Clone, Default)]
pub struct SmtpNotifier {
    relay: RelayConfig,
}

impl SmtpNotifier {
    pub fn new(relay: RelayConfig) -> Self {
        Self { relay }
    }

    fn build_message(request: &NotificationRequest<'_>) -> Result<Message, MonitorError> {
        let credentials = request.credentials;
        let from: Mailbox = credentials.sender.parse().map_err(|e| {
            MonitorError::notify(format!(
                "invalid sender address '{}': {e}",
                credentials.sender
            ))
        })?;
        let to: Mailbox = credentials.recipient.parse().map_err(|e| {
            MonitorError::notify(format!(
                "invalid recipient address '{}': {e}",
                credentials.recipient
            ))
        })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(request.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(request.body.to_string())
            .map_err(|e| MonitorError::notify(format!("failed to build message: {e}")))
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, request: &NotificationRequest<'_>) -> Result<(), MonitorError> {
        let message = Self::build_message(request)?;
        let credentials = request.credentials;

        let transport = SmtpTransport::starttls_relay(&self.relay.host)
            .map_err(|e| {
                MonitorError::notify(format!("relay {} unavailable: {e}", self.relay.host))
            })?
            .port(self.relay.port)
            .credentials(SmtpCredentials::new(
                credentials.sender.clone(),
                credentials.secret.clone(),
            ))
            .timeout(Some(self.relay.timeout))
            .build();

        debug!(
            "Sending alert via {}:{} to {}",
            self.relay.host, self.relay.port, credentials.recipient
        );

        // The connection is dropped with `transport`, whether or not login succeeded.
        transport.send(&message).map_err(|e| {
            MonitorError::notify(format!(
                "{}:{} refused delivery: {e}",
                self.relay.host, self.relay.port
            ))
        })?;
        Ok(())
    }
}

/// Writes alerts to the log instead of mailing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, request: &NotificationRequest<'_>) -> Result<(), MonitorError> {
        warn!("{}: {}", request.subject, request.body);
        Ok(())
    }
}

/// Pairs a notifier with the credentials of the current monitoring run.
pub struct NotificationDispatcher {
    notifier: Box<dyn Notifier>,
    credentials: Credentials,
}

impl NotificationDispatcher {
    pub fn new(notifier: impl Notifier + 'static, credentials: Credentials) -> Self {
        Self {
            notifier: Box::new(notifier),
            credentials,
        }
    }

    /// Sends an alert once. Failures are logged and handed back; nothing is retried.
    pub fn dispatch(&self, alert: &Alert) -> Result<(), MonitorError> {
        let request = NotificationRequest {
            subject: &alert.subject,
            body: &alert.body,
            credentials: &self.credentials,
        };

        match self.notifier.send(&request) {
            Ok(()) => {
                info!("Alert sent: {}", alert.subject);
                Ok(())
            }
            Err(err) => {
                error!("Failed to send email notification: {err}");
                Err(err)
            }
        }
    }
}
