use std::{
    fs::OpenOptions,
    io,
    path::Path,
    sync::Mutex,
};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevelArg;

/// Installs the global `tracing` subscriber.
///
/// An explicit `level` wins over `RUST_LOG`, which wins over `info`. With `log_file` set,
/// records are appended to that file without ANSI colors; otherwise they go to stderr so
/// stdout stays free for reports.
pub fn init_logging(level: Option<LogLevelArg>, log_file: Option<&Path>) -> io::Result<()> {
    let filter = if let Some(level) = level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .try_init();
        }
    }

    Ok(())
}
