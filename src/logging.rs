//! Tracing subscriber setup for the binaries.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Keeps the background log writer alive. Drop it last to flush.
pub type LogGuard = Option<WorkerGuard>;

/// Filter from `RUST_LOG`, default `info`. `debug` overrides both.
pub fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Logs go to stdout when `config.stdout` is set, otherwise to
/// `<directory>/<prefix>.<date>.log`, rotated at midnight with at most
/// `max_files` files kept.
pub fn init(config: &LogConfig) -> Result<LogGuard> {
    let filter = env_filter(config.debug);

    if config.stdout {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .context("failed to install log subscriber")?;
        return Ok(None);
    }

    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "failed to create log directory {}",
            config.directory.display()
        )
    })?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.directory)
        .context("failed to open log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(Some(guard))
}

/// Stderr logging for one-shot tools, keeping stdout for output.
pub fn init_stderr(debug: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to install log subscriber")
}
