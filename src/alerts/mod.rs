//! Alert model, recent-alert history and the dispatcher.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::BoxError;
use crate::events::{ClassifiedEvent, EventKind};

pub mod dispatcher;

pub use dispatcher::AlertDispatcher;

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Worth recording
    Info,
    /// Needs review
    Warning,
    /// Needs action
    Critical,
    /// Needs action now
    Emergency,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Emergency => "EMERGENCY",
        })
    }
}

/// An alert raised by a compliance rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAlert {
    /// Kind of the triggering event
    pub event_type: EventKind,
    /// Urgency
    pub severity: Severity,
    /// Emitting contract
    pub contract_address: Address,
    /// Triggering transaction
    pub transaction_hash: B256,
    /// Block of the triggering transaction
    pub block_number: u64,
    /// When the rule fired
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary
    pub message: String,
    /// Rule-specific structured data
    pub details: Map<String, Value>,
}

impl EventAlert {
    /// Alert about `event`, stamped `timestamp`.
    #[must_use]
    pub fn for_event(
        event: &ClassifiedEvent,
        severity: Severity,
        message: impl Into<String>,
        details: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event.kind,
            severity,
            contract_address: event.raw.address,
            transaction_hash: event.raw.transaction_hash,
            block_number: event.raw.block_number,
            timestamp,
            message: message.into(),
            details,
        }
    }
}

/// External alert sink. Errors and panics are contained by the dispatcher.
pub type AlertCallback = Arc<dyn Fn(&EventAlert) -> Result<(), BoxError> + Send + Sync>;

/// Default number of alerts kept for [`AlertHistory::recent`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded log of dispatched alerts, oldest first.
#[derive(Debug)]
pub struct AlertHistory {
    alerts: Mutex<VecDeque<EventAlert>>,
    capacity: usize,
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AlertHistory {
    /// History holding at most `capacity` alerts (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append, evicting the oldest alert when full.
    pub fn push(&self, alert: EventAlert) {
        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        if alerts.len() >= self.capacity {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    /// Up to `limit` most recent alerts, most recent last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<EventAlert> {
        let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = alerts.len().saturating_sub(limit);
        alerts.iter().skip(skip).cloned().collect()
    }

    /// Alerts currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no alert has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
