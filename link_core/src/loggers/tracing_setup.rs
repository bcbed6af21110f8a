//! # Tracing Setup
//!
//! Installs the global `tracing` subscriber for binaries built on this
//! crate. `RUST_LOG` wins over the configured level. Console output is
//! always on; when a log directory is given, records are also written as
//! JSON lines to a file rotated daily.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Fallback directive when neither `RUST_LOG` nor the configured level parse.
const FALLBACK_LEVEL: &str = "info";

#[derive(Serialize, Deserialize, Debug, Clone)]
/// # Logger Options
///
/// Where and how log records are written.
pub struct LoggerOptions {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"link_core=debug,info"`.
    pub level: String,
    /// Directory for the rolling JSON log file. Console only when `None`.
    pub log_dir: Option<PathBuf>,
    /// File name prefix of the rolling log file.
    pub file_prefix: String,
    /// ANSI colors on the console layer.
    pub ansi: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: FALLBACK_LEVEL.to_string(),
            log_dir: None,
            file_prefix: "link".to_string(),
            ansi: true,
        }
    }
}

/// Filter from `RUST_LOG`, else `level`, else `info`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

/// Installs the global subscriber.
///
/// Returns the file writer's guard when file output is enabled; keep it
/// alive for the life of the process or buffered records are lost.
pub fn setup_logging(options: &LoggerOptions) -> io::Result<Option<WorkerGuard>> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(options.ansi);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = rolling::daily(dir, &options.file_prefix);
            let (writer, guard) = non_blocking(file_appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&options.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(level = %options.level, log_dir = ?options.log_dir, "logging initialized");
    Ok(guard)
}
