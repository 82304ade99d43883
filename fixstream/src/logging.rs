//! Logging infrastructure for fixstream.
//!
//! Structured `tracing` output goes to two places:
//! - `<log_dir>/fixstream.log` (truncated when a session starts)
//! - stderr, so it never mixes with data a command writes to stdout
//!
//! The level is taken from `RUST_LOG` and defaults to `info`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::config_directory;

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// Creates `log_dir` if needed and truncates any previous log file.
///
/// # Errors
///
/// Fails if the directory or file cannot be prepared, or if a global
/// subscriber is already installed.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_names(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// `~/.fixstream/logs`
pub fn default_log_dir() -> PathBuf {
    config_directory().join("logs")
}

pub fn default_log_file() -> &'static str {
    "fixstream.log"
}
