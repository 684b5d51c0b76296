//! Error types for the chain-event monitor.
//!
//! This module provides a unified error type [`SentinelError`] covering every
//! failure the pipeline can observe, from configuration loading through RPC
//! calls, log decoding and alert delivery.
//!
//! # Design
//!
//! The error hierarchy is organized by where the failure is handled:
//! - [`SentinelError::RpcError`]: transient node failures, retried per call
//! - [`SentinelError::PoolExhausted`]: no pooled connection in time, never retried
//! - [`SentinelError::FilterCreationError`] / [`SentinelError::LogFetchError`]:
//!   per-contract, per-tick failures; the contract cursor is not advanced
//! - [`SentinelError::DecodingError`]: malformed logs, skipped by the processor
//! - [`SentinelError::CallbackError`]: alert callback failures, isolated by the dispatcher
//! - [`SentinelError::ShutdownTimeout`]: a worker that did not finish during `stop()`
//!
//! # Example
//!
//! ```
//! use chain_sentinel::error::{SentinelError, SentinelResult};
//!
//! fn validate_batch(max_batch: u64) -> SentinelResult<()> {
//!     if max_batch == 0 {
//!         return Err(SentinelError::config("max_batch must be at least 1", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Result type alias using [`SentinelError`].
pub type SentinelResult<T> = Result<T, SentinelError>;

/// Boxed error used as the optional cause of a [`SentinelError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the monitoring pipeline.
#[derive(Debug)]
pub enum SentinelError {
    /// Configuration or environment variable errors.
    ///
    /// Also used for invalid runtime threshold updates.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// Network or RPC failure while talking to a chain node.
    ///
    /// These are transient: the retry executor re-attempts them.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// No pooled connection became available within the acquire timeout.
    PoolExhausted {
        /// How long the caller waited
        timeout: Duration,
    },

    /// A log filter could not be built for a monitored contract.
    FilterCreationError {
        /// Human-readable error message
        message: String,
    },

    /// Fetching logs for a contract range failed after retries.
    LogFetchError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// A log did not have the shape its signature promises.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// The external alert callback returned an error or panicked.
    CallbackError {
        /// Human-readable error message
        message: String,
    },

    /// A worker task did not finish within the stop timeout.
    ShutdownTimeout {
        /// Name of the execution unit
        unit: &'static str,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Filesystem errors (metrics export, log directories).
    IoError {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl SentinelError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use chain_sentinel::error::SentinelError;
    ///
    /// let err = SentinelError::config("RPC_URLS not set", None);
    /// assert!(matches!(err, SentinelError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use chain_sentinel::error::SentinelError;
    ///
    /// let err = SentinelError::rpc("connection reset", None);
    /// assert!(err.is_transient());
    /// ```
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a pool exhaustion error.
    #[must_use]
    pub const fn pool_exhausted(timeout: Duration) -> Self {
        Self::PoolExhausted { timeout }
    }

    /// Create a filter creation error.
    #[must_use]
    pub fn filter(message: impl Into<String>) -> Self {
        Self::FilterCreationError {
            message: message.into(),
        }
    }

    /// Create a log fetch error.
    #[must_use]
    pub fn log_fetch(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::LogFetchError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    ///
    /// # Example
    ///
    /// ```
    /// use chain_sentinel::error::SentinelError;
    ///
    /// let err = SentinelError::decoding("Transfer log has 1 topic", None);
    /// assert!(matches!(err, SentinelError::DecodingError { .. }));
    /// ```
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a callback error.
    #[must_use]
    pub fn callback(message: impl Into<String>) -> Self {
        Self::CallbackError {
            message: message.into(),
        }
    }

    /// Create a shutdown timeout error.
    #[must_use]
    pub const fn shutdown_timeout(unit: &'static str, timeout: Duration) -> Self {
        Self::ShutdownTimeout { unit, timeout }
    }

    /// Create an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoError {
            message: message.into(),
            source,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only node-side failures qualify; pool exhaustion and decoding
    /// errors are returned to the caller immediately.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RpcError { .. } | Self::LogFetchError { .. })
    }
}

impl fmt::Display for SentinelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::PoolExhausted { timeout } => write!(
                f,
                "Connection pool exhausted: no connection available within {}ms",
                timeout.as_millis()
            ),
            Self::FilterCreationError { message } => write!(f, "Filter creation error: {message}"),
            Self::LogFetchError { message, .. } => write!(f, "Log fetch error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::CallbackError { message } => write!(f, "Alert callback error: {message}"),
            Self::ShutdownTimeout { unit, timeout } => write!(
                f,
                "Shutdown timeout: {unit} did not stop within {}ms",
                timeout.as_millis()
            ),
            Self::IoError { message, .. } => write!(f, "I/O error: {message}"),
        }
    }
}

impl std::error::Error for SentinelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::LogFetchError { source, .. }
            | Self::DecodingError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::IoError { source, .. } => Some(source),
            Self::PoolExhausted { .. }
            | Self::FilterCreationError { .. }
            | Self::CallbackError { .. }
            | Self::ShutdownTimeout { .. } => None,
        }
    }
}

/// Convert from `eyre::Report` to `SentinelError`.
///
/// The node transport reports through `eyre`, so reports become transient
/// RPC errors. The outermost context is the message; the full chain stays
/// reachable through `source()`.
impl From<eyre::Report> for SentinelError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error() {
        let err = SentinelError::config("test error", None);
        assert!(matches!(err, SentinelError::ConfigError { .. }));
        assert_eq!(err.to_string(), "Configuration error: test error");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rpc_error_is_transient() {
        let err = SentinelError::rpc("connection failed", None);
        assert_eq!(err.to_string(), "RPC error: connection failed");
        assert!(err.is_transient());
    }

    #[test]
    fn test_pool_exhausted_is_not_transient() {
        let err = SentinelError::pool_exhausted(Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Connection pool exhausted: no connection available within 250ms"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = SentinelError::shutdown_timeout("ingestor", Duration::from_secs(5));
        assert_eq!(
            err.to_string(),
            "Shutdown timeout: ingestor did not stop within 5000ms"
        );
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SentinelError::config("failed to load", Some(Box::new(source)));

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Configuration error: failed to load");
    }

    #[test]
    fn test_from_eyre_report() {
        use eyre::WrapErr;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream closed");
        let report = Err::<(), _>(io)
            .wrap_err("Failed to fetch latest block number")
            .err();
        assert!(report.is_some());

        if let Some(report) = report {
            let err = SentinelError::from(report);
            assert!(err.is_transient());
            assert_eq!(err.to_string(), "RPC error: Failed to fetch latest block number");

            let chain: Vec<String> = std::iter::successors(err.source(), |&e| e.source())
                .map(ToString::to_string)
                .collect();
            assert!(chain.iter().any(|m| m.contains("upstream closed")));
        }
    }
}
