//! Scripted in-memory chain client for unit tests.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{ChainClient, LogQuery};
use crate::error::{SentinelError, SentinelResult};
use crate::events::RawEvent;

#[derive(Debug, Default)]
struct MockState {
    head: AtomicU64,
    head_failures: AtomicU32,
    logs: Mutex<HashMap<Address, Vec<RawEvent>>>,
    failing_contracts: Mutex<HashSet<Address>>,
    gas: Mutex<HashMap<B256, u64>>,
    queries: Mutex<Vec<LogQuery>>,
    logs_gate: Mutex<Option<LogsGate>>,
}

#[derive(Debug)]
struct LogsGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// Clones share state, so every pooled connection sees the same chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockChainClient {
    state: Arc<MockState>,
}

impl MockChainClient {
    pub(crate) fn with_head(head: u64) -> Self {
        let client = Self::default();
        client.set_head(head);
        client
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.state.head.store(head, Ordering::SeqCst);
    }

    pub(crate) fn fail_head_times(&self, times: u32) {
        self.state.head_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn push_log(&self, event: RawEvent) {
        if let Ok(mut logs) = self.state.logs.lock() {
            logs.entry(event.address).or_default().push(event);
        }
    }

    pub(crate) fn fail_contract(&self, address: Address, failing: bool) {
        if let Ok(mut set) = self.state.failing_contracts.lock() {
            if failing {
                set.insert(address);
            } else {
                set.remove(&address);
            }
        }
    }

    pub(crate) fn set_gas(&self, tx_hash: B256, gas: u64) {
        if let Ok(mut gas_map) = self.state.gas.lock() {
            gas_map.insert(tx_hash, gas);
        }
    }

    /// Hold the next `get_logs` call until `release` is notified. The first
    /// returned handle fires once that call has been recorded.
    pub(crate) fn gate_next_logs(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        if let Ok(mut gate) = self.state.logs_gate.lock() {
            *gate = Some(LogsGate {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            });
        }
        (entered, release)
    }

    pub(crate) fn queries(&self) -> Vec<LogQuery> {
        self.state
            .queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> SentinelResult<u64> {
        let remaining = self.state.head_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.head_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SentinelError::rpc("mock head failure", None));
        }
        Ok(self.state.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, query: &LogQuery) -> SentinelResult<Vec<RawEvent>> {
        if let Ok(mut queries) = self.state.queries.lock() {
            queries.push(query.clone());
        }
        let gate = self.state.logs_gate.lock().ok().and_then(|mut g| g.take());
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let failing = self
            .state
            .failing_contracts
            .lock()
            .map(|set| set.contains(&query.address))
            .unwrap_or(false);
        if failing {
            return Err(SentinelError::rpc("mock getLogs failure", None));
        }

        let logs = self.state.logs.lock().map_or_else(
            |_| Vec::new(),
            |logs| {
                logs.get(&query.address)
                    .map(|events| {
                        events
                            .iter()
                            .filter(|e| e.block_number >= query.from_block)
                            .filter(|e| e.block_number <= query.to_block)
                            .filter(|e| {
                                query.topic0.is_empty()
                                    || e.signature().is_some_and(|s| query.topic0.contains(&s))
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            },
        );
        Ok(logs)
    }

    async fn gas_used(&self, tx_hash: B256) -> SentinelResult<Option<u64>> {
        Ok(self
            .state
            .gas
            .lock()
            .ok()
            .and_then(|gas| gas.get(&tx_hash).copied()))
    }

    fn endpoint(&self) -> &str {
        "mock://chain"
    }
}
