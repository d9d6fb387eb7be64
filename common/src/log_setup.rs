use std::fs::OpenOptions;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer alive. Dropping the guard flushes any
/// buffered records, so it must outlive the last log statement of the run.
#[must_use]
#[derive(Debug)]
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Initializes logging for one image run: console output plus a plain-text
/// per-image log file.
///
/// `verbose` lowers the base filter from `info` to `debug`; `RUST_LOG`
/// overrides either. `clobber` truncates an existing log file instead of
/// appending to it.
pub fn setup_logging(log_file: &Path, verbose: bool, clobber: bool) -> LogGuard {
    let base_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(base_level))
        .unwrap_or_else(|e| panic!("Invalid log filter: {}", e));

    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("Failed to create log directory: {}", e));
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(clobber)
        .append(!clobber)
        .open(log_file)
        .unwrap_or_else(|e| panic!("Failed to open log file {}: {}", log_file.display(), e));

    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(true)
        .with_writer(console_writer);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .unwrap_or_else(|e| panic!("Logger initialization failed: {}", e));

    LogGuard { _guard: guard }
}
