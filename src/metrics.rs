//! Pipeline counters.
//!
//! All counters live in one [`TransactionMetrics`] value behind a single
//! mutex. Callers only ever see a [`MetricsSnapshot`] copy.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::events::{ClassifiedEvent, EventKind};

#[derive(Debug, Default)]
struct TransactionMetrics {
    total_transactions: u64,
    events_by_kind: BTreeMap<EventKind, u64>,
    unclassified_events: u64,
    total_gas_used: u64,
    total_value_transferred: U256,
    unique_addresses: HashSet<Address>,
    events_received: u64,
    dropped_events: u64,
    decode_failures: u64,
    alerts_generated: u64,
    dropped_alerts: u64,
    alerts_dispatched: u64,
    callback_failures: u64,
    last_event_time: Option<DateTime<Utc>>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Events that went through classification, unknown ones included
    pub total_transactions: u64,
    /// Per-kind counts, keyed by lower-case kind name; every known kind present
    pub events_by_kind: BTreeMap<String, u64>,
    /// Events whose signature was not recognized
    pub unclassified_events: u64,
    /// Sum of receipt gas over events that carried it
    pub total_gas_used: u64,
    /// Sum of decoded Transfer values, decimal raw units
    pub total_value_transferred: String,
    /// Distinct contract addresses seen
    pub unique_addresses: usize,
    /// Events the ingestor enqueued
    pub events_received: u64,
    /// Events dropped on a full event queue
    pub dropped_events: u64,
    /// Logs skipped because they failed to decode
    pub decode_failures: u64,
    /// Alerts produced by the rule engine
    pub alerts_generated: u64,
    /// Alerts dropped on a full alert queue
    pub dropped_alerts: u64,
    /// Alerts the dispatcher handled
    pub alerts_dispatched: u64,
    /// Callback invocations that failed or panicked
    pub callback_failures: u64,
    /// When the last event was processed
    pub last_event_time: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Count for one known kind; unknown kinds read the unclassified counter.
    #[must_use]
    pub fn kind_count(&self, kind: EventKind) -> u64 {
        if kind == EventKind::Unknown {
            return self.unclassified_events;
        }
        self.events_by_kind.get(kind.as_str()).copied().unwrap_or(0)
    }
}

/// Thread-safe metrics sink shared by every pipeline unit.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<TransactionMetrics>,
}

impl MetricsAggregator {
    /// Create an aggregator with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TransactionMetrics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Account for one classified event.
    pub fn record_event(&self, event: &ClassifiedEvent, at: DateTime<Utc>) {
        let mut m = self.lock();
        m.total_transactions += 1;
        if event.kind == EventKind::Unknown {
            m.unclassified_events += 1;
        } else {
            *m.events_by_kind.entry(event.kind).or_default() += 1;
        }
        m.unique_addresses.insert(event.raw.address);
        if let Some(gas) = event.raw.gas_used {
            m.total_gas_used = m.total_gas_used.saturating_add(gas);
        }
        if event.kind == EventKind::Transfer {
            if let Some(value) = event.uint_arg("value") {
                m.total_value_transferred = m.total_value_transferred.saturating_add(value);
            }
        }
        m.last_event_time = Some(at);
    }

    /// An event made it onto the event queue.
    pub fn record_received(&self) {
        self.lock().events_received += 1;
    }

    /// An event was dropped on a full queue.
    pub fn record_dropped_event(&self) {
        self.lock().dropped_events += 1;
    }

    /// A log failed to decode and was skipped.
    pub fn record_decode_failure(&self) {
        self.lock().decode_failures += 1;
    }

    /// The rule engine produced `count` alerts.
    pub fn record_alerts(&self, count: usize) {
        self.lock().alerts_generated += count as u64;
    }

    /// An alert was dropped on a full queue.
    pub fn record_dropped_alert(&self) {
        self.lock().dropped_alerts += 1;
    }

    /// The dispatcher handled one alert.
    pub fn record_dispatched(&self) {
        self.lock().alerts_dispatched += 1;
    }

    /// The alert callback failed.
    pub fn record_callback_failure(&self) {
        self.lock().callback_failures += 1;
    }

    /// Copy every counter under one lock acquisition.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let m = self.lock();
        let events_by_kind = EventKind::KNOWN
            .iter()
            .map(|kind| {
                (
                    kind.as_str().to_string(),
                    m.events_by_kind.get(kind).copied().unwrap_or(0),
                )
            })
            .collect();

        MetricsSnapshot {
            total_transactions: m.total_transactions,
            events_by_kind,
            unclassified_events: m.unclassified_events,
            total_gas_used: m.total_gas_used,
            total_value_transferred: m.total_value_transferred.to_string(),
            unique_addresses: m.unique_addresses.len(),
            events_received: m.events_received,
            dropped_events: m.dropped_events,
            decode_failures: m.decode_failures,
            alerts_generated: m.alerts_generated,
            dropped_alerts: m.dropped_alerts,
            alerts_dispatched: m.alerts_dispatched,
            callback_failures: m.callback_failures,
            last_event_time: m.last_event_time,
        }
    }
}
