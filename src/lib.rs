//! Bookstream library
//!
//! Maintains a consistent local limit order book for one trading pair by
//! reconciling a REST depth snapshot with the incremental diff stream.

pub mod binance;
pub mod book;
pub mod cli;
pub mod config;
pub mod feed;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize the tracing subscriber. When a log file path is configured a
/// non-blocking rolling file layer is added; the returned guard must stay
/// alive for buffered lines to be flushed.
pub fn init_logging(level: &str, log: &config::LogConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bookstream={}", level).into());

    if log.file_path.trim().is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    }

    let path = std::path::Path::new(&log.file_path);
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "bookstream.log".into());

    let file_appender = tracing_appender::rolling::daily(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Ok(Some(guard))
}
