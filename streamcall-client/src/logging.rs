use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    prelude::*,
    EnvFilter,
};

const DEFAULT_FILTER: &str = "streamcall_client=debug,streamcall_transport=debug,warn";

/// Install a subscriber that logs call activity to stderr and to a daily log file.
///
/// The returned guard flushes the file writer when dropped; hold it for the life of
/// the process.
pub fn init_logging(log_dir: impl AsRef<Path>, log_prefix: &str) -> anyhow::Result<WorkerGuard> {
    let log_dir_path = log_dir.as_ref();
    std::fs::create_dir_all(log_dir_path)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(log_prefix)
        .build(log_dir_path)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(log_dir = ?log_dir_path, "Call logging initialized");
    Ok(guard)
}

/// Console-only logging for tests. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("streamcall_client=trace,streamcall_transport=trace,info")),
        )
        .with_test_writer()
        .try_init();
}
