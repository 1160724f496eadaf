//! File logging for the command-line client.
//!
//! Stdout carries command output, so log lines go to `restocache.log` in the
//! data directory. `RUST_LOG` selects the level (default: `info`).

use std::path::Path;

use color_eyre::{eyre::WrapErr, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "restocache.log";

/// Install the global subscriber.
///
/// The returned guard flushes buffered lines when dropped; hold it until exit.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;

  let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .wrap_err("Failed to install log subscriber")?;

  Ok(guard)
}
