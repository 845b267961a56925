//! Logging setup.
//!
//! The configured level applies to this crate. Dependencies (sqlx, hyper,
//! reqwest) only log warnings unless `RUST_LOG` says otherwise. Lines logged
//! inside a relay cycle carry the `feed{id=...}` span.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::Result;

/// Level used when the configured one is not recognised.
const FALLBACK_LEVEL: &str = "info";

/// Level for every target outside this crate.
const DEPENDENCY_LEVEL: &str = "warn";

/// Normalize a configured level name.
fn level_name(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        "off" => "off",
        _ => FALLBACK_LEVEL,
    }
}

/// Default filter directives for a configured level.
fn default_directives(level: &str) -> String {
    format!(
        "{},{}={}",
        DEPENDENCY_LEVEL,
        env!("CARGO_CRATE_NAME"),
        level_name(level)
    )
}

/// Build the filter, preferring `RUST_LOG` when it is set and valid.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialize logging to stdout and the configured log file.
///
/// The file is appended to, so restarts keep earlier cycles' history.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if let Some(parent) = Path::new(&config.file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)?;
    let writer = std::io::stdout.and(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .with(build_filter(&config.level))
        .init();

    Ok(())
}

/// Initialize console-only logging.
///
/// Used when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(build_filter(level))
        .init();
}
