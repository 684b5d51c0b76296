//! Monitor lifecycle and read APIs.
//!
//! # Pipeline
//!
//! ```text
//!  EventIngestor ──► event queue ──► EventProcessor ──► alert queue ──► AlertDispatcher
//!   (poll ticks)     (bounded)      classify, count,     (bounded)       log, history,
//!                                   evaluate rules                        callback
//! ```
//!
//! [`EventMonitor::start`] spawns the three units as tokio tasks with fresh
//! queues and a fresh shutdown signal. [`EventMonitor::stop`] signals them and
//! joins each under the stop timeout. A unit that does not finish in time is
//! aborted and the monitor reports itself unhealthy until the next clean
//! start; the aborted task may still hold resources until it reaches an await
//! point.
//!
//! State that outlives a run (contracts and their cursors, thresholds, rule
//! windows, metrics, alert history) belongs to the monitor, so a restart
//! resumes where the previous run stopped.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::alerts::{AlertCallback, AlertDispatcher, AlertHistory, EventAlert};
use crate::classifier::SignatureRegistry;
use crate::config::{Config, MonitorConfig};
use crate::error::{SentinelError, SentinelResult};
use crate::events::{ClassifiedEvent, EventKind, RawEvent};
use crate::ingest::{
    BlockRangeTracker, ContractRegistry, ContractStatus, EventIngestor, IngestSettings,
    MonitoredContract,
};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::rpc::{
    AlloyHttpClient, ChainClient, ConnectionPool, LogQuery, NodeGateway, PoolStatus,
    RetryExecutor,
};
use crate::rules::{ComplianceRuleEngine, ComplianceThresholds, Rule, SharedThresholds};

mod processor;

use processor::EventProcessor;

/// Operational summary returned by [`EventMonitor::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    /// Whether worker units are running
    pub is_running: bool,
    /// `false` after a stop that had to abort a unit
    pub healthy: bool,
    /// Contracts under watch
    pub monitored_contracts: usize,
    /// Events the ingestor enqueued
    pub events_received: u64,
    /// Events classified
    pub events_processed: u64,
    /// Events skipped as undecodable
    pub events_failed: u64,
    /// Seconds since the current run started, 0 when stopped
    pub runtime_seconds: f64,
    /// When the last event was processed
    pub last_event_time: Option<DateTime<Utc>>,
    /// Per-contract cursors
    pub contracts: Vec<ContractStatus>,
}

/// Metrics plus queue depths, returned by [`EventMonitor::get_metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorMetrics {
    /// Counter snapshot
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    /// Contracts under watch
    pub monitored_contracts: usize,
    /// Events waiting in the event queue
    pub pending_events: usize,
    /// Alerts waiting in the alert queue
    pub pending_alerts: usize,
}

/// Pool occupancy and node reachability.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Pool occupancy
    pub pool: PoolStatus,
    /// Current head, when the node answered
    pub head: Option<u64>,
    /// Why the head could not be read
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct MetricsExport<'a> {
    timestamp: i64,
    export_time: String,
    #[serde(flatten)]
    metrics: MonitorMetrics,
    thresholds: &'a ComplianceThresholds,
}

struct RunningUnits {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    events: mpsc::Sender<RawEvent>,
    alerts: mpsc::Sender<EventAlert>,
    started_at: Instant,
}

/// Chain-event monitor: owns the pipeline state and its worker units.
pub struct EventMonitor<C> {
    gateway: NodeGateway<C>,
    config: MonitorConfig,
    contracts: Arc<ContractRegistry>,
    signatures: Arc<RwLock<SignatureRegistry>>,
    thresholds: SharedThresholds,
    engine: Arc<Mutex<ComplianceRuleEngine>>,
    metrics: Arc<MetricsAggregator>,
    history: Arc<AlertHistory>,
    callback: Option<AlertCallback>,
    units: Mutex<Option<RunningUnits>>,
    healthy: AtomicBool,
}

impl<C> std::fmt::Debug for EventMonitor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMonitor")
            .field("config", &self.config)
            .field("contracts", &self.contracts.len())
            .field("running", &self.lock_units().is_some())
            .field("healthy", &self.healthy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C> EventMonitor<C> {
    fn lock_units(&self) -> MutexGuard<'_, Option<RunningUnits>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventMonitor<AlloyHttpClient> {
    /// Build the HTTP connection pool described by `config` and a monitor on it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no endpoint passes the liveness check.
    pub async fn connect(config: &Config) -> SentinelResult<Self> {
        let pool = ConnectionPool::connect(
            config.rpc_urls(),
            config.pool_size(),
            config.acquire_timeout(),
            |url| async move { AlloyHttpClient::connect(&url).await },
        )
        .await?;
        Ok(Self::new(pool, config.monitor().clone()))
    }
}

impl<C: ChainClient> EventMonitor<C> {
    /// Monitor over `pool` with the built-in signatures and rules.
    #[must_use]
    pub fn new(pool: ConnectionPool<C>, config: MonitorConfig) -> Self {
        let thresholds = crate::rules::shared_thresholds(config.thresholds.clone());
        let engine = ComplianceRuleEngine::new(Arc::clone(&thresholds), config.window_scope);
        Self {
            gateway: NodeGateway::new(Arc::new(pool), RetryExecutor::new(config.retry)),
            contracts: Arc::new(ContractRegistry::new()),
            signatures: Arc::new(RwLock::new(SignatureRegistry::with_defaults())),
            thresholds,
            engine: Arc::new(Mutex::new(engine)),
            metrics: Arc::new(MetricsAggregator::new()),
            history: Arc::new(AlertHistory::new(config.alert_history)),
            callback: None,
            units: Mutex::new(None),
            healthy: AtomicBool::new(true),
            config,
        }
    }

    /// Set the external alert sink. Takes effect on the next `start()`.
    #[must_use]
    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Watch a contract.
    ///
    /// `from_block` is the first block to scan; without it scanning starts
    /// after the current head. Re-adding an address replaces its entry.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::FilterCreationError`] if a requested kind has
    /// no registered signature, or the node error if the head is needed and
    /// cannot be read.
    #[instrument(skip(self, event_kinds, name), fields(contract = %address))]
    pub async fn add_contract(
        &self,
        address: Address,
        event_kinds: BTreeSet<EventKind>,
        name: impl Into<String>,
        from_block: Option<u64>,
    ) -> SentinelResult<()> {
        self.signatures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .topic_filter(&event_kinds)?;

        let cursor = match from_block {
            Some(first) => first.saturating_sub(1),
            None => self.gateway.block_number().await?,
        };

        let contract = MonitoredContract::new(address, name, event_kinds, cursor);
        if self.contracts.insert(contract) {
            warn!(contract = %address, "Contract was already monitored, entry replaced");
        }
        Ok(())
    }

    /// Stop watching a contract. Returns whether it was monitored.
    pub fn remove_contract(&self, address: &Address) -> bool {
        self.contracts.remove(address).is_some()
    }

    /// Map an extra signature to a kind, e.g. a token's own freeze event.
    pub fn register_signature(&self, signature: &str, kind: EventKind) -> B256 {
        self.signatures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_signature(signature, kind)
    }

    /// Append a custom rule after the built-in ones.
    pub fn add_rule(&self, rule: Box<dyn Rule>) {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_rule(rule);
    }

    /// Update a compliance threshold at runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown key or a value that is not
    /// a positive number; thresholds are left unchanged.
    pub fn set_threshold(&self, key: &str, value: &str) -> SentinelResult<()> {
        self.thresholds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value)?;
        info!(key, value, "Compliance threshold updated");
        Ok(())
    }

    /// Current thresholds.
    #[must_use]
    pub fn thresholds(&self) -> ComplianceThresholds {
        self.thresholds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn the ingestor, processor and dispatcher.
    ///
    /// Returns `Ok(false)` without doing anything if already running.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when called outside a tokio runtime.
    pub fn start(&self) -> SentinelResult<bool> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SentinelError::config("start() requires a tokio runtime", Some(Box::new(e)))
        })?;

        let mut units = self.lock_units();
        if units.is_some() {
            warn!("Monitor already running");
            return Ok(false);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_capacity.max(1));
        let (alerts_tx, alerts_rx) = mpsc::channel(self.config.alert_queue_capacity.max(1));

        let ingestor = EventIngestor::new(
            self.gateway.clone(),
            BlockRangeTracker::new(self.config.confirmations, self.config.max_batch),
            Arc::clone(&self.contracts),
            Arc::clone(&self.signatures),
            Arc::clone(&self.metrics),
            events_tx.clone(),
            IngestSettings {
                poll_interval: self.config.poll_interval,
                enqueue_timeout: self.config.enqueue_timeout,
                fetch_receipts: self.config.fetch_receipts,
            },
        );
        let processor = EventProcessor {
            signatures: Arc::clone(&self.signatures),
            engine: Arc::clone(&self.engine),
            metrics: Arc::clone(&self.metrics),
            alerts: alerts_tx.clone(),
            enqueue_timeout: self.config.enqueue_timeout,
        };
        let dispatcher = AlertDispatcher::new(
            self.callback.clone(),
            Arc::clone(&self.history),
            Arc::clone(&self.metrics),
        );

        let handles = vec![
            ("ingestor", runtime.spawn(ingestor.run(shutdown_rx.clone()))),
            (
                "processor",
                runtime.spawn(processor.run(events_rx, shutdown_rx.clone())),
            ),
            (
                "dispatcher",
                runtime.spawn(dispatcher.run(alerts_rx, shutdown_rx)),
            ),
        ];

        *units = Some(RunningUnits {
            shutdown: shutdown_tx,
            handles,
            events: events_tx,
            alerts: alerts_tx,
            started_at: Instant::now(),
        });
        self.healthy.store(true, Ordering::SeqCst);

        info!(contracts = self.contracts.len(), "Event monitor started");
        Ok(true)
    }

    /// Signal every unit to exit and join each under the stop timeout.
    ///
    /// The monitor is stopped when this returns, whatever the result. Does
    /// nothing if not running.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::ShutdownTimeout`] for the first unit that had
    /// to be aborted; the monitor is then flagged unhealthy.
    pub async fn stop(&self) -> SentinelResult<()> {
        let Some(units) = self.lock_units().take() else {
            return Ok(());
        };

        info!("Stopping event monitor");
        let _ = units.shutdown.send(true);

        let timeout = self.config.stop_timeout;
        let mut first_failure = None;
        for (unit, mut handle) in units.handles {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(unit, error = %e, "Worker unit failed");
                    self.healthy.store(false, Ordering::SeqCst);
                }
                Err(_) => {
                    handle.abort();
                    let e = SentinelError::shutdown_timeout(unit, timeout);
                    error!(unit, error = %e, "Worker unit aborted");
                    self.healthy.store(false, Ordering::SeqCst);
                    first_failure.get_or_insert(e);
                }
            }
        }

        info!(
            healthy = self.is_healthy(),
            runtime_secs = units.started_at.elapsed().as_secs(),
            "Event monitor stopped"
        );
        first_failure.map_or(Ok(()), Err)
    }

    /// Whether worker units are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_units().is_some()
    }

    /// `false` after a stop that had to abort a unit, until the next start.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Counters plus queue depths.
    #[must_use]
    pub fn get_metrics(&self) -> MonitorMetrics {
        let (pending_events, pending_alerts) = self.lock_units().as_ref().map_or((0, 0), |u| {
            (
                u.events.max_capacity() - u.events.capacity(),
                u.alerts.max_capacity() - u.alerts.capacity(),
            )
        });
        MonitorMetrics {
            snapshot: self.metrics.snapshot(),
            monitored_contracts: self.contracts.len(),
            pending_events,
            pending_alerts,
        }
    }

    /// Lifecycle and per-contract summary.
    #[must_use]
    pub fn get_stats(&self) -> MonitorStats {
        let snapshot = self.metrics.snapshot();
        let (is_running, runtime_seconds) = self
            .lock_units()
            .as_ref()
            .map_or((false, 0.0), |u| (true, u.started_at.elapsed().as_secs_f64()));
        let contracts = self.contracts.statuses();

        MonitorStats {
            is_running,
            healthy: self.is_healthy(),
            monitored_contracts: contracts.len(),
            events_received: snapshot.events_received,
            events_processed: snapshot.total_transactions,
            events_failed: snapshot.decode_failures,
            runtime_seconds,
            last_event_time: snapshot.last_event_time,
            contracts,
        }
    }

    /// Up to `limit` most recently dispatched alerts, most recent last.
    #[must_use]
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<EventAlert> {
        self.history.recent(limit)
    }

    /// Cursor of one contract.
    #[must_use]
    pub fn last_block_processed(&self, address: &Address) -> Option<u64> {
        self.contracts.cursor(address)
    }

    /// Write metrics and thresholds to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub async fn export_metrics(&self, path: impl AsRef<Path>) -> SentinelResult<()> {
        let path = path.as_ref();
        let now = Utc::now();
        let thresholds = self.thresholds();
        let export = MetricsExport {
            timestamp: now.timestamp(),
            export_time: now.to_rfc3339(),
            metrics: self.get_metrics(),
            thresholds: &thresholds,
        };

        let json = serde_json::to_vec_pretty(&export)
            .map_err(|e| SentinelError::io("Failed to serialize metrics", e.into()))?;
        tokio::fs::write(path, json).await.map_err(|e| {
            SentinelError::io(format!("Failed to write metrics to {}", path.display()), e)
        })?;

        info!(path = %path.display(), "Metrics exported");
        Ok(())
    }

    /// One-off fetch of past events of one kind, in `max_batch` chunks.
    ///
    /// Undecodable logs are skipped. Does not touch cursors or metrics.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `from_block > to_block`, a filter error
    /// if `kind` has no signature, or the node error for any failed chunk.
    #[instrument(skip(self), fields(contract = %address, kind = %kind))]
    pub async fn get_historical_events(
        &self,
        address: Address,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> SentinelResult<Vec<ClassifiedEvent>> {
        if from_block > to_block {
            return Err(SentinelError::config(
                format!("from_block {from_block} is after to_block {to_block}"),
                None,
            ));
        }

        let kinds = BTreeSet::from([kind]);
        let topic0 = self
            .signatures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .topic_filter(&kinds)?;

        let batch = self.config.max_batch.max(1);
        let mut events = Vec::new();
        let mut start = from_block;
        loop {
            let end = start.saturating_add(batch - 1).min(to_block);
            let query = LogQuery {
                address,
                from_block: start,
                to_block: end,
                topic0: topic0.clone(),
            };
            let logs = self.gateway.get_logs(&query).await?;

            let registry = self.signatures.read().unwrap_or_else(PoisonError::into_inner);
            for raw in logs {
                match registry.classify(raw) {
                    Ok(event) => events.push(event),
                    Err(e) => warn!(error = %e, "Skipping undecodable historical event"),
                }
            }
            drop(registry);

            if end >= to_block {
                break;
            }
            start = end + 1;
        }

        info!(count = events.len(), from_block, to_block, "Historical events fetched");
        Ok(events)
    }

    /// Pool occupancy and a fresh head read.
    pub async fn connection_status(&self) -> ConnectionStatus {
        let pool = self.gateway.pool_status();
        match self.gateway.block_number().await {
            Ok(head) => ConnectionStatus {
                pool,
                head: Some(head),
                error: None,
            },
            Err(e) => ConnectionStatus {
                pool,
                head: None,
                error: Some(e.to_string()),
            },
        }
    }
}
