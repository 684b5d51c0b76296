//! Structured logging setup.
//!
//! Everything in the crate logs through `tracing` with key-value fields
//! (`contract`, `tx`, `block`, `error`, ...). This module installs the
//! subscriber once at startup.
//!
//! # Usage
//!
//! ```no_run
//! use chain_sentinel::observability;
//!
//! # fn main() -> chain_sentinel::error::SentinelResult<()> {
//! // Keep the guard alive for the life of the process so file logs flush.
//! let _guard = observability::init_tracing(None, None, false)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! # Component-specific levels
//! RUST_LOG=chain_sentinel=debug,alloy=warn chain-sentinel watch ...
//!
//! # JSON output for log aggregation
//! LOG_JSON=true chain-sentinel watch ...
//!
//! # Also write JSON logs to a daily-rotated file
//! LOG_FILE=./logs/sentinel.log chain-sentinel watch ...
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{SentinelError, SentinelResult};

/// Filter used when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_FILTER: &str = "chain_sentinel=info,warn";

/// Install the global tracing subscriber.
///
/// * `log_level` - filter override, used when `RUST_LOG` is unset
/// * `log_file` - optional file for JSON logs, rotated daily
/// * `json_output` - JSON instead of pretty console output
///
/// Returns the file writer's guard when `log_file` is set; dropping it stops
/// the background writer.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a subscriber is
/// already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> SentinelResult<Option<WorkerGuard>> {
    let env_filter = if let Ok(filter) = std::env::var("RUST_LOG") {
        EnvFilter::new(filter)
    } else if let Some(level) = log_level {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(DEFAULT_FILTER)
    };

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    let (file_layer, guard) = match log_file.as_deref() {
        Some(path) => {
            let (layer, guard) = file_layer(path)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // The filter layer gates every layer, the file one included.
    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| {
            SentinelError::config("Failed to install tracing subscriber", Some(Box::new(e)))
        })?;

    info!(
        json_output,
        file_logging = log_file.is_some(),
        "Tracing initialized"
    );

    Ok(guard)
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn file_layer(path: &Path) -> SentinelResult<(BoxedLayer, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| {
        SentinelError::io(format!("Failed to create log directory {}", dir.display()), e)
    })?;

    let appender = tracing_appender::rolling::daily(
        dir,
        path.file_name().unwrap_or_else(|| OsStr::new("sentinel.log")),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // File output is always JSON.
    let layer = fmt::layer()
        .json()
        .with_writer(writer)
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .boxed();

    Ok((layer, guard))
}

/// Install a test-friendly subscriber; later calls are ignored.
///
/// Output shows with `cargo test -- --nocapture`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
