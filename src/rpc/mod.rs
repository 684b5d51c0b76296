//! Chain-node access: client abstraction, connection pooling and retries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              RetryExecutor               │
//! │   (bounded exponential backoff per call) │
//! └──────────────────────────────────────────┘
//!                     │ acquire per attempt
//!          ┌──────────▼──────────┐
//!          │   ConnectionPool    │
//!          │ (N leased, FIFO)    │
//!          └─────────────────────┘
//!            │        │        │
//!       ┌────▼──┐ ┌───▼───┐ ┌──▼────┐
//!       │ conn 0│ │ conn 1│ │ conn 2│   round-robin over endpoints
//!       └───────┘ └───────┘ └───────┘
//! ```
//!
//! - **Client** ([`ChainClient`]): the three JSON-RPC calls the pipeline needs
//! - **HTTP** ([`http`]): Alloy-backed implementation
//! - **Pool** ([`pool`]): bounded lease/return with acquire timeout
//! - **Retry** ([`retry`]): wraps a single call, never a whole poll tick
//! - **Gateway** ([`gateway`]): pool and retry combined per call

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use crate::error::SentinelResult;
use crate::events::RawEvent;

pub mod gateway;
pub mod http;
pub mod pool;
pub mod retry;

#[cfg(test)]
pub(crate) mod mock;

pub use gateway::NodeGateway;
pub use http::{create_provider, AlloyHttpClient, Provider};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use retry::{RetryConfig, RetryExecutor};

/// `eth_getLogs` query for one contract and an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// Contract address
    pub address: Address,
    /// First block, inclusive
    pub from_block: u64,
    /// Last block, inclusive
    pub to_block: u64,
    /// Accepted topic-0 hashes; empty accepts every event
    pub topic0: Vec<B256>,
}

/// Minimal chain-node interface used by the pipeline.
///
/// Implementations must be cheap to call concurrently; the pool hands each
/// connection to one caller at a time.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Current chain head height (`eth_blockNumber`).
    async fn block_number(&self) -> SentinelResult<u64>;

    /// Logs matching `query`, in node order (`eth_getLogs`).
    async fn get_logs(&self, query: &LogQuery) -> SentinelResult<Vec<RawEvent>>;

    /// Gas used by a mined transaction (`eth_getTransactionReceipt`).
    async fn gas_used(&self, tx_hash: B256) -> SentinelResult<Option<u64>>;

    /// Liveness check used once when the pool is built.
    async fn is_connected(&self) -> bool {
        self.block_number().await.is_ok()
    }

    /// Endpoint this client talks to, safe to log.
    fn endpoint(&self) -> &str;
}
