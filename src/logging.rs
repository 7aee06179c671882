use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes console logging plus a JSON log file rotated daily under `log_dir`.
///
/// The returned guard flushes the file writer when dropped, so `main` must
/// hold it for the lifetime of the process.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mobility_etl=info,warn"));

    // Fall back to console-only logging if the log directory is unusable
    if fs::create_dir_all(log_dir).is_err() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
        tracing::warn!("Could not create log directory {}, logging to console only", log_dir.display());
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "etl.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Installs the global subscriber, so this is the only test that may call it
    #[test]
    fn file_logging_creates_directory_and_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let guard = init_logging(&log_dir);
        assert!(guard.is_some());
        assert!(log_dir.is_dir());
        tracing::info!("logging initialized");
    }
}
