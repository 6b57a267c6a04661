//! Logging bootstrap: file plus stdout, filtered by `RUST_LOG`.

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keep this alive for as long as logging should flush to the file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Operator log directory, shared with the server's own temp logs.
pub fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("geoweaver_logs")
}

pub fn default_log_file() -> &'static str {
    "operator.log"
}

/// Install the global subscriber: a non-blocking file layer (no ANSI) and a
/// stdout layer, both behind an `EnvFilter` defaulting to `info`.
///
/// Library code never calls this; the embedding binary decides when.
pub fn init_logging(log_dir: &Path, log_file: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);
    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_locations_are_stable() {
        assert!(default_log_dir().ends_with("geoweaver_logs"));
        assert_eq!(default_log_file(), "operator.log");
    }

    // The global subscriber can only be installed once per process, so this
    // is the single test that calls init_logging.
    #[test]
    fn init_logging_creates_the_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let _guard = init_logging(&log_dir, "operator.log").unwrap();
        assert!(log_dir.is_dir());
        tracing::info!("logging bootstrap smoke line");
    }
}
