//! Command-line interface for svcwatch.
use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    notify::{Credentials, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT, RelayConfig},
    probe::DEFAULT_RESTART_TIMEOUT,
};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };
            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcwatch.
#[derive(Parser)]
#[command(name = "svcwatch", version, author)]
#[command(
    about = "Watches services, checks their dependencies and restarts them when they stop",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Append log records to this file instead of stderr.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Talk to the per-user service manager (`systemctl --user`).
    #[arg(long, global = true)]
    pub user: bool,

    /// Seconds to wait for `systemctl restart` before giving up on it.
    #[arg(long, value_name = "SECS", global = true, default_value_t = DEFAULT_RESTART_TIMEOUT.as_secs())]
    pub restart_timeout: u64,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for svcwatch.
#[derive(Subcommand)]
pub enum Commands {
    /// Monitor services until interrupted.
    Run {
        /// Path to the configuration file (defaults to `services.yaml`).
        #[arg(short, long, default_value = "services.yaml")]
        config: PathBuf,

        #[command(flatten)]
        mail: MailArgs,
    },

    /// Run a single check over every configured service and print the result.
    Check {
        /// Path to the configuration file (defaults to `services.yaml`).
        #[arg(short, long, default_value = "services.yaml")]
        config: PathBuf,

        #[command(flatten)]
        mail: MailArgs,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Load the configuration file and report whether it is usable.
    Validate {
        /// Path to the configuration file (defaults to `services.yaml`).
        #[arg(short, long, default_value = "services.yaml")]
        config: PathBuf,
    },
}

/// Mail account and relay for alerts. Without an account, alerts are only logged.
#[derive(Args, Debug, Clone)]
pub struct MailArgs {
    /// Address alerts are sent from; also the relay login.
    #[arg(long, env = "SVCWATCH_SENDER")]
    pub sender: Option<String>,

    /// Password for the sender account.
    #[arg(long, env = "SVCWATCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Address that receives alerts.
    #[arg(long, env = "SVCWATCH_RECIPIENT")]
    pub recipient: Option<String>,

    /// SMTP relay host (STARTTLS).
    #[arg(long, default_value = DEFAULT_SMTP_HOST)]
    pub smtp_host: String,

    /// SMTP relay port.
    #[arg(long, default_value_t = DEFAULT_SMTP_PORT)]
    pub smtp_port: u16,

    /// Seconds to wait on the relay before giving up on an alert.
    #[arg(long, default_value_t = 30)]
    pub smtp_timeout: u64,
}

impl MailArgs {
    /// Returns credentials when all three fields are given, `None` when none are.
    pub fn credentials(&self) -> Result<Option<Credentials>, String> {
        match (&self.sender, &self.password, &self.recipient) {
            (Some(sender), Some(password), Some(recipient)) => Ok(Some(Credentials::new(
                sender.clone(),
                password.clone(),
                recipient.clone(),
            ))),
            (None, None, None) => Ok(None),
            _ => Err("--sender, --password and --recipient must be given together".into()),
        }
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            timeout: Duration::from_secs(self.smtp_timeout),
        }
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
