//! Shared helpers for integration tests.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use chain_sentinel::config::MonitorConfig;
use chain_sentinel::error::SentinelResult;
use chain_sentinel::events::{Freeze, RawEvent, Transfer};
use chain_sentinel::monitor::EventMonitor;
use chain_sentinel::rpc::{ChainClient, ConnectionPool, LogQuery, RetryConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One whole token at 18 decimals.
pub const TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Default)]
struct Chain {
    head: AtomicU64,
    hang: AtomicBool,
    logs: Mutex<Vec<RawEvent>>,
    queries: Mutex<Vec<LogQuery>>,
}

/// In-memory chain; clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChain {
    chain: Arc<Chain>,
}

impl ScriptedChain {
    pub fn new(head: u64) -> Self {
        let client = Self::default();
        client.chain.head.store(head, Ordering::SeqCst);
        client
    }

    pub fn set_head(&self, head: u64) {
        self.chain.head.store(head, Ordering::SeqCst);
    }

    /// Make every head read block forever.
    pub fn hang(&self) {
        self.chain.hang.store(true, Ordering::SeqCst);
    }

    pub fn push(&self, event: RawEvent) {
        if let Ok(mut logs) = self.chain.logs.lock() {
            logs.push(event);
        }
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.chain
            .queries
            .lock()
            .map(|q| q.iter().map(|q| (q.from_block, q.to_block)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn block_number(&self) -> SentinelResult<u64> {
        if self.chain.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.chain.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, query: &LogQuery) -> SentinelResult<Vec<RawEvent>> {
        if let Ok(mut queries) = self.chain.queries.lock() {
            queries.push(query.clone());
        }
        let logs = self.chain.logs.lock().map_or_else(
            |_| Vec::new(),
            |logs| {
                logs.iter()
                    .filter(|e| e.address == query.address)
                    .filter(|e| (query.from_block..=query.to_block).contains(&e.block_number))
                    .filter(|e| {
                        query.topic0.is_empty()
                            || e.signature().is_some_and(|s| query.topic0.contains(&s))
                    })
                    .cloned()
                    .collect()
            },
        );
        Ok(logs)
    }

    async fn gas_used(&self, _tx_hash: B256) -> SentinelResult<Option<u64>> {
        Ok(None)
    }

    fn endpoint(&self) -> &str {
        "scripted://chain"
    }
}

/// Fast-polling settings with a single retry attempt.
pub fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(50),
        confirmations: 3,
        max_batch: 1_000,
        stop_timeout: Duration::from_secs(1),
        retry: RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
        ..MonitorConfig::default()
    }
}

pub fn monitor(chain: &ScriptedChain, config: MonitorConfig) -> EventMonitor<ScriptedChain> {
    let pool = ConnectionPool::from_connections(
        vec![chain.clone(), chain.clone()],
        Duration::from_secs(1),
    );
    EventMonitor::new(pool, config)
}

fn address_topic(address: Address) -> B256 {
    address.into_word()
}

pub fn transfer(token: Address, block: u64, tokens: u128) -> RawEvent {
    let value = U256::from(tokens) * U256::from(TOKEN);
    RawEvent {
        address: token,
        topics: vec![
            Transfer::SIGNATURE_HASH,
            address_topic(Address::repeat_byte(0xaa)),
            address_topic(Address::repeat_byte(0xbb)),
        ],
        data: Bytes::from(value.to_be_bytes::<32>().to_vec()),
        transaction_hash: B256::from(U256::from(block)),
        block_number: block,
        log_index: 0,
        gas_used: None,
    }
}

pub fn freeze(token: Address, block: u64) -> RawEvent {
    RawEvent {
        address: token,
        topics: vec![Freeze::SIGNATURE_HASH, address_topic(Address::repeat_byte(0xcc))],
        data: Bytes::new(),
        transaction_hash: B256::from(U256::from(block + 1_000_000)),
        block_number: block,
        log_index: 1,
        gas_used: None,
    }
}

/// Poll `check` on virtual time until it holds or `rounds` run out.
pub async fn eventually<F: Fn() -> bool>(check: F, rounds: usize) -> bool {
    for _ in 0..rounds {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
