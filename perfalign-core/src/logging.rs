//! Logging for the reader
//!
//! Everything goes to a daily-rotated file under `$XDG_STATE_HOME/perfalign/`.
//! Escalations on [`OPERATOR_TARGET`] are also mirrored to stderr, whatever
//! the configured file level, so a failing reader is visible on its console
//! without raising verbosity.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::Targets,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log target for conditions an operator should look at.
pub const OPERATOR_TARGET: &str = "perfalign::operator";

const LOG_FILE_PREFIX: &str = "perfalign.log";

/// Install the global subscriber.
///
/// The file layer honours `RUST_LOG` first, then `config.level`. At most
/// `config.max_files` rotated files are kept.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    let operator_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .without_time()
        .with_filter(operator_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(operator_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Only error-level escalations on the operator target.
fn operator_filter() -> Targets {
    Targets::new().with_target(OPERATOR_TARGET, Level::ERROR)
}

/// Test subscriber writing through the test harness capture.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered log lines when dropped; hold it for the process lifetime.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Prefix of the rotated log files (a date suffix is appended).
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        assert!(log_file_path().ends_with(LOG_FILE_PREFIX));
    }

    #[test]
    fn test_operator_filter_passes_escalations_only() {
        let filter = operator_filter();
        assert!(filter.would_enable(OPERATOR_TARGET, &Level::ERROR));
        assert!(!filter.would_enable(OPERATOR_TARGET, &Level::WARN));
        assert!(!filter.would_enable("perfalign_core::reader", &Level::ERROR));
    }
}
