//! Polling ingestion loop.
//!
//! Each tick reads the head once, then scans every monitored contract
//! concurrently. A contract whose scan fails keeps its cursor and is retried
//! on the next tick; the others are unaffected.

use alloy::primitives::{Address, B256};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::{BlockRangeTracker, ContractRegistry, MonitoredContract};
use crate::classifier::SignatureRegistry;
use crate::error::SentinelResult;
use crate::events::RawEvent;
use crate::metrics::MetricsAggregator;
use crate::rpc::{ChainClient, LogQuery, NodeGateway};

/// Ingestor timing and receipt settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    /// Time between ticks
    pub poll_interval: Duration,
    /// How long a push may wait on a full event queue
    pub enqueue_timeout: Duration,
    /// Look up receipts to fill `gas_used`
    pub fetch_receipts: bool,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Head read at the start of the tick
    pub head: u64,
    /// Contracts whose cursor advanced
    pub scanned: usize,
    /// Contracts whose scan failed
    pub failed: usize,
    /// Events pushed onto the queue
    pub enqueued: usize,
    /// Events dropped on a full queue
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct ScanOutcome {
    advanced: bool,
    enqueued: usize,
    dropped: usize,
}

/// Producer side of the event queue.
#[derive(Debug)]
pub struct EventIngestor<C> {
    gateway: NodeGateway<C>,
    tracker: BlockRangeTracker,
    contracts: Arc<ContractRegistry>,
    signatures: Arc<RwLock<SignatureRegistry>>,
    metrics: Arc<MetricsAggregator>,
    events: mpsc::Sender<RawEvent>,
    settings: IngestSettings,
}

impl<C: ChainClient> EventIngestor<C> {
    /// Wire an ingestor to its collaborators.
    #[must_use]
    pub const fn new(
        gateway: NodeGateway<C>,
        tracker: BlockRangeTracker,
        contracts: Arc<ContractRegistry>,
        signatures: Arc<RwLock<SignatureRegistry>>,
        metrics: Arc<MetricsAggregator>,
        events: mpsc::Sender<RawEvent>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            gateway,
            tracker,
            contracts,
            signatures,
            metrics,
            events,
            settings,
        }
    }

    /// Poll until `shutdown` flips or its sender goes away.
    ///
    /// A tick in flight is allowed to finish; shutdown latency is bounded by
    /// the current retry cycle.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis(),
            confirmations = self.tracker.confirmations(),
            max_batch = self.tracker.max_batch(),
            "Event ingestor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Poll tick skipped");
                    }
                }
            }
        }

        info!("Event ingestor stopped");
    }

    /// One poll over every monitored contract.
    ///
    /// # Errors
    ///
    /// Fails only when the chain head cannot be read; per-contract failures
    /// are logged and counted in the report.
    pub async fn tick(&self) -> SentinelResult<TickReport> {
        let head = self.gateway.block_number().await?;
        let contracts = self.contracts.snapshot();
        trace!(head, contracts = contracts.len(), "Poll tick");

        let outcomes = join_all(contracts.iter().map(|c| self.scan_contract(c, head))).await;

        let mut report = TickReport {
            head,
            ..TickReport::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(o) => {
                    report.scanned += usize::from(o.advanced);
                    report.enqueued += o.enqueued;
                    report.dropped += o.dropped;
                }
                Err(_) => report.failed += 1,
            }
        }

        if report.enqueued > 0 || report.dropped > 0 || report.failed > 0 {
            debug!(
                head,
                scanned = report.scanned,
                failed = report.failed,
                enqueued = report.enqueued,
                dropped = report.dropped,
                "Poll tick finished"
            );
        }
        Ok(report)
    }

    async fn scan_contract(
        &self,
        contract: &MonitoredContract,
        head: u64,
    ) -> SentinelResult<ScanOutcome> {
        let cursor = contract.last_block_processed();
        let Some(range) = self.tracker.next_range(head, cursor) else {
            return Ok(ScanOutcome::default());
        };
        let (from, to) = (*range.start(), *range.end());

        let topic0 = self
            .signatures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .topic_filter(&contract.event_kinds)
            .map_err(|e| {
                error!(contract = %contract.address, error = %e, "Cannot build log filter");
                e
            })?;

        let query = LogQuery {
            address: contract.address,
            from_block: from,
            to_block: to,
            topic0,
        };
        let mut logs = self.gateway.get_logs(&query).await.map_err(|e| {
            error!(
                contract = %contract.address,
                name = %contract.name,
                from,
                to,
                error = %e,
                "Log fetch failed, cursor held"
            );
            e
        })?;

        if self.settings.fetch_receipts && !logs.is_empty() {
            self.attach_gas(&mut logs, contract.address).await;
        }

        let mut outcome = ScanOutcome::default();
        for event in logs {
            if self.enqueue(event).await {
                outcome.enqueued += 1;
            } else {
                outcome.dropped += 1;
            }
        }

        outcome.advanced = self.contracts.advance(contract, to);
        debug!(
            contract = %contract.address,
            from,
            to,
            events = outcome.enqueued,
            "Scanned block range"
        );
        Ok(outcome)
    }

    /// One receipt lookup per distinct transaction. Failures leave the field empty.
    async fn attach_gas(&self, logs: &mut [RawEvent], contract: Address) {
        let mut gas: HashMap<B256, Option<u64>> = HashMap::new();
        for event in logs.iter() {
            if gas.contains_key(&event.transaction_hash) {
                continue;
            }
            let used = match self.gateway.gas_used(event.transaction_hash).await {
                Ok(used) => used,
                Err(e) => {
                    warn!(
                        contract = %contract,
                        tx = %event.transaction_hash,
                        error = %e,
                        "Receipt lookup failed"
                    );
                    None
                }
            };
            gas.insert(event.transaction_hash, used);
        }

        for event in logs.iter_mut() {
            event.gas_used = gas.get(&event.transaction_hash).copied().flatten();
        }
    }

    /// Push with a bounded wait. Returns `false` if the event was dropped.
    async fn enqueue(&self, event: RawEvent) -> bool {
        match self
            .events
            .send_timeout(event, self.settings.enqueue_timeout)
            .await
        {
            Ok(()) => {
                self.metrics.record_received();
                true
            }
            Err(SendTimeoutError::Timeout(event)) => {
                self.metrics.record_dropped_event();
                warn!(
                    contract = %event.address,
                    tx = %event.transaction_hash,
                    block = event.block_number,
                    "Event queue full, dropping event"
                );
                false
            }
            Err(SendTimeoutError::Closed(event)) => {
                self.metrics.record_dropped_event();
                debug!(tx = %event.transaction_hash, "Event queue closed, dropping event");
                false
            }
        }
    }
}
