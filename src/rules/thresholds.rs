//! Runtime-adjustable compliance thresholds.

use alloy::primitives::U256;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{SentinelError, SentinelResult};

/// Threshold set shared between the monitor (writer) and the rule engine.
pub type SharedThresholds = Arc<RwLock<ComplianceThresholds>>;

/// Keys accepted by [`ComplianceThresholds::set`].
pub const THRESHOLD_KEYS: [&str; 4] = [
    "large_transfer_amount",
    "rapid_transfers_count",
    "rapid_transfers_window",
    "suspicious_gas_multiplier",
];

/// Named, positive thresholds used by the built-in rules.
///
/// Amounts are raw token units. The defaults assume 18 decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceThresholds {
    /// Transfers strictly above this amount raise a warning
    #[serde(serialize_with = "serialize_decimal")]
    pub large_transfer_amount: U256,
    /// More events than this inside the window raise a warning
    pub rapid_transfers_count: u64,
    /// Rapid-transfer window, in seconds
    pub rapid_transfers_window: u64,
    /// Gas above baseline times this multiplier raises an info alert
    pub suspicious_gas_multiplier: f64,
}

fn serialize_decimal<S: serde::Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

impl Default for ComplianceThresholds {
    fn default() -> Self {
        Self {
            large_transfer_amount: U256::from(1_000_000u64) * U256::from(10u64).pow(U256::from(18u64)),
            rapid_transfers_count: 10,
            rapid_transfers_window: 300,
            suspicious_gas_multiplier: 5.0,
        }
    }
}

impl ComplianceThresholds {
    /// Rapid-transfer window as a [`Duration`].
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.rapid_transfers_window)
    }

    /// Parse `value` and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, leaving every threshold unchanged, if the
    /// key is unknown or the value does not parse to a positive number.
    ///
    /// # Example
    ///
    /// ```
    /// use chain_sentinel::rules::ComplianceThresholds;
    ///
    /// let mut thresholds = ComplianceThresholds::default();
    /// assert!(thresholds.set("rapid_transfers_count", "25").is_ok());
    /// assert_eq!(thresholds.rapid_transfers_count, 25);
    /// assert!(thresholds.set("rapid_transfers_count", "0").is_err());
    /// ```
    pub fn set(&mut self, key: &str, value: &str) -> SentinelResult<()> {
        let value = value.trim();
        match key {
            "large_transfer_amount" => {
                let amount: U256 = value.parse().map_err(|e| invalid(key, value, e))?;
                if amount.is_zero() {
                    return Err(not_positive(key));
                }
                self.large_transfer_amount = amount;
            }
            "rapid_transfers_count" => {
                self.rapid_transfers_count = positive_int(key, value)?;
            }
            "rapid_transfers_window" => {
                self.rapid_transfers_window = positive_int(key, value)?;
            }
            "suspicious_gas_multiplier" => {
                let multiplier: f64 = value.parse().map_err(|e| invalid(key, value, e))?;
                if !multiplier.is_finite() || multiplier <= 0.0 {
                    return Err(not_positive(key));
                }
                self.suspicious_gas_multiplier = multiplier;
            }
            other => {
                return Err(SentinelError::config(
                    format!(
                        "unknown threshold '{other}' (expected one of: {})",
                        THRESHOLD_KEYS.join(", ")
                    ),
                    None,
                ))
            }
        }
        Ok(())
    }
}

fn positive_int(key: &str, value: &str) -> SentinelResult<u64> {
    let parsed: u64 = value.parse().map_err(|e| invalid(key, value, e))?;
    if parsed == 0 {
        return Err(not_positive(key));
    }
    Ok(parsed)
}

fn invalid<E>(key: &str, value: &str, e: E) -> SentinelError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SentinelError::config(
        format!("invalid value '{value}' for threshold '{key}'"),
        Some(Box::new(e)),
    )
}

fn not_positive(key: &str) -> SentinelError {
    SentinelError::config(format!("threshold '{key}' must be positive"), None)
}
