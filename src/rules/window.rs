//! Time-bounded occurrence buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Ordered timestamps of recent occurrences.
///
/// Timestamps are expected in non-decreasing order; pruning stops at the
/// first entry still inside the window.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    entries: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    /// Empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries older than `window` before `now`, record `now`, and
    /// return the resulting count.
    pub fn record(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.prune(now, window);
        self.entries.push_back(now);
        self.entries.len()
    }

    /// Drop entries older than `window` before `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        while let Some(oldest) = self.entries.front() {
            if now.signed_duration_since(*oldest).num_milliseconds() <= window_ms {
                break;
            }
            self.entries.pop_front();
        }
    }

    /// Entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which events share a rapid-transfer window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowScope {
    /// One window across every monitored contract
    #[default]
    Global,
    /// One window per emitting contract
    PerContract,
}

impl std::str::FromStr for WindowScope {
    type Err = crate::error::SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per-contract" | "per_contract" => Ok(Self::PerContract),
            other => Err(crate::error::SentinelError::config(
                format!("unknown window scope '{other}' (expected global or per-contract)"),
                None,
            )),
        }
    }
}
