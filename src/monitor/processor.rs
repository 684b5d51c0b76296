//! Event queue consumer: classify, count, evaluate rules, queue alerts.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alerts::EventAlert;
use crate::classifier::SignatureRegistry;
use crate::events::{EventKind, RawEvent};
use crate::metrics::MetricsAggregator;
use crate::rules::ComplianceRuleEngine;

/// The middle pipeline unit.
#[derive(Debug)]
pub(crate) struct EventProcessor {
    pub(crate) signatures: Arc<RwLock<SignatureRegistry>>,
    pub(crate) engine: Arc<Mutex<ComplianceRuleEngine>>,
    pub(crate) metrics: Arc<MetricsAggregator>,
    pub(crate) alerts: mpsc::Sender<EventAlert>,
    pub(crate) enqueue_timeout: Duration,
}

impl EventProcessor {
    pub(crate) async fn run(
        self,
        mut events: mpsc::Receiver<RawEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Event processor started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = events.recv() => match next {
                    Some(event) => self.process(event).await,
                    None => break,
                },
            }
        }
        info!("Event processor stopped");
    }

    /// Handle one event. Never fails: bad logs are counted and skipped.
    pub(crate) async fn process(&self, raw: RawEvent) {
        let classified = {
            let registry = self.signatures.read().unwrap_or_else(PoisonError::into_inner);
            registry.classify(raw)
        };
        let event = match classified {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_decode_failure();
                warn!(error = %e, "Skipping undecodable event");
                return;
            }
        };

        let now = Utc::now();
        self.metrics.record_event(&event, now);

        if event.kind == EventKind::Unknown {
            debug!(
                contract = %event.raw.address,
                tx = %event.raw.transaction_hash,
                signature = ?event.raw.signature(),
                "Unclassified event"
            );
            return;
        }

        let alerts = {
            let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
            engine.evaluate(&event, now)
        };
        if alerts.is_empty() {
            return;
        }
        self.metrics.record_alerts(alerts.len());

        for alert in alerts {
            match self.alerts.send_timeout(alert, self.enqueue_timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(alert) | SendTimeoutError::Closed(alert)) => {
                    self.metrics.record_dropped_alert();
                    warn!(
                        event_type = %alert.event_type,
                        tx = %alert.transaction_hash,
                        "Alert queue unavailable, dropping alert"
                    );
                }
            }
        }
    }
}
