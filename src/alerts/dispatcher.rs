//! Alert queue consumer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::{AlertCallback, AlertHistory, EventAlert, Severity};
use crate::error::{SentinelError, SentinelResult};
use crate::metrics::MetricsAggregator;

/// Logs each alert, records it, then hands it to the optional callback.
pub struct AlertDispatcher {
    callback: Option<AlertCallback>,
    history: Arc<AlertHistory>,
    metrics: Arc<MetricsAggregator>,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("has_callback", &self.callback.is_some())
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl AlertDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        callback: Option<AlertCallback>,
        history: Arc<AlertHistory>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            callback,
            history,
            metrics,
        }
    }

    /// Drain `alerts` until shutdown. Alerts already queued at shutdown are
    /// still dispatched.
    pub async fn run(
        self,
        mut alerts: mpsc::Receiver<EventAlert>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Alert dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = alerts.recv() => match next {
                    Some(alert) => {
                        let _ = self.dispatch(alert);
                    }
                    None => break,
                },
            }
        }

        let mut drained = 0usize;
        while let Ok(alert) = alerts.try_recv() {
            let _ = self.dispatch(alert);
            drained += 1;
        }
        info!(drained, "Alert dispatcher stopped");
    }

    /// Dispatch one alert.
    ///
    /// The alert is always logged and recorded in history, whatever the
    /// callback does.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::CallbackError`] if the callback failed or
    /// panicked. The failure is already logged and counted.
    pub fn dispatch(&self, alert: EventAlert) -> SentinelResult<()> {
        log_alert(&alert);
        self.metrics.record_dispatched();
        self.history.push(alert.clone());

        let Some(callback) = &self.callback else {
            return Ok(());
        };

        let outcome = match catch_unwind(AssertUnwindSafe(|| callback(&alert))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => SentinelError::callback(format!("alert callback failed: {e}")),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                SentinelError::callback(format!("alert callback panicked: {reason}"))
            }
        };

        self.metrics.record_callback_failure();
        error!(
            error = %outcome,
            tx = %alert.transaction_hash,
            event_type = %alert.event_type,
            "Alert callback error"
        );
        Err(outcome)
    }
}

fn log_alert(alert: &EventAlert) {
    let details = serde_json::Value::Object(alert.details.clone());
    match alert.severity {
        Severity::Critical | Severity::Emergency => error!(
            severity = %alert.severity,
            event_type = %alert.event_type,
            contract = %alert.contract_address,
            tx = %alert.transaction_hash,
            block = alert.block_number,
            details = %details,
            "{}",
            alert.message
        ),
        Severity::Warning => warn!(
            severity = %alert.severity,
            event_type = %alert.event_type,
            contract = %alert.contract_address,
            tx = %alert.transaction_hash,
            block = alert.block_number,
            details = %details,
            "{}",
            alert.message
        ),
        Severity::Info => info!(
            severity = %alert.severity,
            event_type = %alert.event_type,
            contract = %alert.contract_address,
            tx = %alert.transaction_hash,
            block = alert.block_number,
            details = %details,
            "{}",
            alert.message
        ),
    }
    debug!(block = alert.block_number, "Alert logged");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::tests::alert;
    use crate::error::BoxError;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    fn dispatcher(callback: Option<AlertCallback>) -> (AlertDispatcher, Arc<AlertHistory>, Arc<MetricsAggregator>) {
        let history = Arc::new(AlertHistory::default());
        let metrics = Arc::new(MetricsAggregator::new());
        (
            AlertDispatcher::new(callback, history.clone(), metrics.clone()),
            history,
            metrics,
        )
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_failing_callback_is_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: AlertCallback = {
            let seen = seen.clone();
            Arc::new(move |alert: &EventAlert| -> Result<(), BoxError> {
                if alert.block_number == 2 {
                    return Err("sink unavailable".into());
                }
                if alert.block_number == 3 {
                    panic!("sink exploded");
                }
                seen.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(alert.block_number);
                Ok(())
            })
        };
        let (dispatcher, history, metrics) = dispatcher(Some(callback));

        assert!(dispatcher.dispatch(alert(1)).is_ok());
        assert!(matches!(
            dispatcher.dispatch(alert(2)),
            Err(SentinelError::CallbackError { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch(alert(3)),
            Err(SentinelError::CallbackError { .. })
        ));
        assert!(dispatcher.dispatch(alert(4)).is_ok());

        let delivered = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(delivered, vec![1, 4]);
        assert_eq!(history.len(), 4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.alerts_dispatched, 4);
        assert_eq!(snapshot.callback_failures, 2);
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_shutdown() {
        let (dispatcher, history, _) = dispatcher(None);
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(dispatcher.run(rx, shutdown_rx));
        for block in 1..=3 {
            assert!(tx.send(alert(block)).await.is_ok());
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(shutdown_tx.send(true).is_ok());
        assert!(tokio::time::timeout(Duration::from_secs(1), handle).await.is_ok());

        let blocks: Vec<u64> = history.recent(10).iter().map(|a| a.block_number).collect();
        assert_eq!(blocks, vec![1, 2, 3]);
    }
}
