//! Configuration management for the chain-event monitor.
//!
//! [`Config`] is loaded from environment variables (and a `.env` file, via
//! `dotenvy`) by the binary. Library users build a [`MonitorConfig`] directly;
//! its `Default` matches the environment defaults below.
//!
//! ## Environment Variables
//!
//! Required:
//! - `RPC_URLS`: comma-separated chain-node HTTP endpoints
//!
//! Optional (with defaults):
//! - `POOL_SIZE`: pooled connections (default: 5)
//! - `POLL_INTERVAL_SECS`: seconds between poll ticks (default: 2)
//! - `CONFIRMATIONS`: blocks held back from the head (default: 3)
//! - `MAX_BATCH_BLOCKS`: maximum blocks per log query (default: 100)
//! - `EVENT_QUEUE_CAPACITY` / `ALERT_QUEUE_CAPACITY` (default: 10000 / 1000)
//! - `ACQUIRE_TIMEOUT_MS`: pool lease timeout (default: 10000)
//! - `ENQUEUE_TIMEOUT_MS`: wait on a full queue before dropping (default: 100)
//! - `STOP_TIMEOUT_SECS`: per-worker join timeout on stop (default: 5)
//! - `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_DELAY_MS`, `RETRY_BACKOFF_FACTOR`,
//!   `RETRY_MAX_DELAY_MS` (default: 3, 500, 2.0, 30000)
//! - `FETCH_RECEIPTS`: fill gas usage from receipts (default: false)
//! - `RAPID_TRANSFER_SCOPE`: `global` or `per-contract` (default: global)
//! - `LARGE_TRANSFER_AMOUNT`, `RAPID_TRANSFERS_COUNT`, `RAPID_TRANSFERS_WINDOW`,
//!   `SUSPICIOUS_GAS_MULTIPLIER`: compliance thresholds
//! - `LOG_JSON`: JSON console logs (default: false)
//! - `LOG_FILE`: also write JSON logs to this file, rotated daily
//! - `RUST_LOG`: log filter (default: "`chain_sentinel=info,warn`")
//!
//! ## Example
//!
//! ```no_run
//! use chain_sentinel::config::Config;
//! use chain_sentinel::error::SentinelResult;
//!
//! # fn main() -> SentinelResult<()> {
//! let config = Config::from_env()?;
//! println!("Endpoints: {}", config.rpc_urls().len());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{SentinelError, SentinelResult};
use crate::rpc::RetryConfig;
use crate::rules::{ComplianceThresholds, WindowScope};

/// Pipeline settings used by [`EventMonitor`](crate::monitor::EventMonitor).
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time between poll ticks
    pub poll_interval: Duration,
    /// Blocks held back from the head
    pub confirmations: u64,
    /// Maximum blocks per log query
    pub max_batch: u64,
    /// Event queue capacity
    pub event_queue_capacity: usize,
    /// Alert queue capacity
    pub alert_queue_capacity: usize,
    /// Wait on a full queue before dropping
    pub enqueue_timeout: Duration,
    /// Per-worker join timeout in `stop()`
    pub stop_timeout: Duration,
    /// Fill `gas_used` from transaction receipts
    pub fetch_receipts: bool,
    /// Rapid-transfer window scope
    pub window_scope: WindowScope,
    /// Initial compliance thresholds
    pub thresholds: ComplianceThresholds,
    /// Retry policy for node calls
    pub retry: RetryConfig,
    /// Alerts kept for `get_recent_alerts`
    pub alert_history: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            confirmations: 3,
            max_batch: 100,
            event_queue_capacity: 10_000,
            alert_queue_capacity: 1_000,
            enqueue_timeout: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
            fetch_receipts: false,
            window_scope: WindowScope::Global,
            thresholds: ComplianceThresholds::default(),
            retry: RetryConfig::default(),
            alert_history: crate::alerts::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Process configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chain-node HTTP endpoints
    rpc_urls: Vec<String>,

    /// Pooled connections
    pool_size: usize,

    /// Pool lease timeout
    acquire_timeout: Duration,

    /// JSON console output
    log_json: bool,

    /// Optional rotating log file
    log_file: Option<PathBuf>,

    /// Pipeline settings
    monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first if present, then reads every variable listed in the
    /// module docs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the variable if `RPC_URLS` is
    /// missing or any value is malformed or out of range.
    pub fn from_env() -> SentinelResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> SentinelResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = MonitorConfig::default();

        // Required: at least one endpoint
        let rpc_urls: Vec<String> = vars
            .get("RPC_URLS")
            .ok_or_else(|| {
                SentinelError::config("RPC_URLS environment variable is required", None)
            })?
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ToString::to_string)
            .collect();

        if rpc_urls.is_empty() {
            return Err(SentinelError::config(
                "RPC_URLS must list at least one endpoint",
                None,
            ));
        }
        if let Some(bad) = rpc_urls.iter().find(|url| !url.starts_with("http")) {
            return Err(SentinelError::config(
                format!("RPC_URLS entries must be http(s) URLs, got: {bad}"),
                None,
            ));
        }

        let pool_size = vars.at_least_one("POOL_SIZE", 5)?;
        let acquire_timeout = Duration::from_millis(vars.parse("ACQUIRE_TIMEOUT_MS", 10_000)?);
        let log_json = vars.parse("LOG_JSON", false)?;
        let log_file = vars.get("LOG_FILE").map(PathBuf::from);

        let retry = RetryConfig {
            max_attempts: vars.at_least_one("RETRY_MAX_ATTEMPTS", 3)?,
            initial_delay: Duration::from_millis(vars.parse("RETRY_INITIAL_DELAY_MS", 500)?),
            backoff_factor: vars.parse("RETRY_BACKOFF_FACTOR", 2.0)?,
            max_delay: Duration::from_millis(vars.parse("RETRY_MAX_DELAY_MS", 30_000)?),
        };
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
            return Err(SentinelError::config(
                "RETRY_BACKOFF_FACTOR must be at least 1.0",
                None,
            ));
        }

        let mut thresholds = ComplianceThresholds::default();
        for (var, key) in [
            ("LARGE_TRANSFER_AMOUNT", "large_transfer_amount"),
            ("RAPID_TRANSFERS_COUNT", "rapid_transfers_count"),
            ("RAPID_TRANSFERS_WINDOW", "rapid_transfers_window"),
            ("SUSPICIOUS_GAS_MULTIPLIER", "suspicious_gas_multiplier"),
        ] {
            if let Some(value) = vars.get(var) {
                thresholds.set(key, &value).map_err(|e| {
                    SentinelError::config(format!("{var} is invalid"), Some(Box::new(e)))
                })?;
            }
        }

        let monitor = MonitorConfig {
            poll_interval: Duration::from_secs(vars.at_least_one("POLL_INTERVAL_SECS", 2)?),
            confirmations: vars.parse("CONFIRMATIONS", defaults.confirmations)?,
            max_batch: vars.at_least_one("MAX_BATCH_BLOCKS", defaults.max_batch)?,
            event_queue_capacity: vars
                .at_least_one("EVENT_QUEUE_CAPACITY", defaults.event_queue_capacity)?,
            alert_queue_capacity: vars
                .at_least_one("ALERT_QUEUE_CAPACITY", defaults.alert_queue_capacity)?,
            enqueue_timeout: Duration::from_millis(vars.parse("ENQUEUE_TIMEOUT_MS", 100)?),
            stop_timeout: Duration::from_secs(vars.at_least_one("STOP_TIMEOUT_SECS", 5)?),
            fetch_receipts: vars.parse("FETCH_RECEIPTS", false)?,
            window_scope: vars.parse("RAPID_TRANSFER_SCOPE", WindowScope::Global)?,
            thresholds,
            retry,
            alert_history: defaults.alert_history,
        };

        Ok(Self {
            rpc_urls,
            pool_size,
            acquire_timeout,
            log_json,
            log_file,
            monitor,
        })
    }

    /// Get the configured endpoints.
    #[must_use]
    pub fn rpc_urls(&self) -> &[String] {
        &self.rpc_urls
    }

    /// Get the pool size.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the pool acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Check if JSON console logging is enabled.
    #[must_use]
    pub const fn log_json(&self) -> bool {
        self.log_json
    }

    /// Get the log file path, if any.
    #[must_use]
    pub const fn log_file(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Get the pipeline settings.
    #[must_use]
    pub const fn monitor(&self) -> &MonitorConfig {
        &self.monitor
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> SentinelResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| {
                SentinelError::config(format!("{key} is invalid ('{raw}'): {e}"), None)
            }),
        }
    }

    fn at_least_one<T>(&self, key: &str, default: T) -> SentinelResult<T>
    where
        T: FromStr + PartialOrd + From<u8>,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value < T::from(1) {
            return Err(SentinelError::config(
                format!("{key} must be at least 1"),
                None,
            ));
        }
        Ok(value)
    }
}
