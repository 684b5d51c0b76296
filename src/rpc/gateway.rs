//! Pool-plus-retry front door for chain-node calls.
//!
//! Every call acquires a fresh connection per attempt, so a retry after a
//! failure lands on the next connection in the pool's rotation and the lease
//! never outlives the call.

use alloy::primitives::B256;
use std::sync::Arc;

use super::{ChainClient, ConnectionPool, LogQuery, PoolStatus, RetryExecutor};
use crate::error::{SentinelError, SentinelResult};
use crate::events::RawEvent;

/// Retrying access to a [`ConnectionPool`].
#[derive(Debug)]
pub struct NodeGateway<C> {
    pool: Arc<ConnectionPool<C>>,
    retry: RetryExecutor,
}

impl<C> Clone for NodeGateway<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            retry: self.retry.clone(),
        }
    }
}

impl<C: ChainClient> NodeGateway<C> {
    /// Wrap `pool` with `retry`.
    #[must_use]
    pub const fn new(pool: Arc<ConnectionPool<C>>, retry: RetryExecutor) -> Self {
        Self { pool, retry }
    }

    /// Pool occupancy.
    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Current chain head.
    ///
    /// # Errors
    ///
    /// Returns the last transient error after retries, or
    /// [`SentinelError::PoolExhausted`] immediately.
    pub async fn block_number(&self) -> SentinelResult<u64> {
        let pool = &self.pool;
        self.retry
            .run_if(
                move || async move {
                    let conn = pool.acquire().await?;
                    conn.block_number().await
                },
                SentinelError::is_transient,
            )
            .await
    }

    /// Logs for one contract range.
    ///
    /// # Errors
    ///
    /// A node failure that survives every retry is reported as
    /// [`SentinelError::LogFetchError`] naming the contract and range.
    pub async fn get_logs(&self, query: &LogQuery) -> SentinelResult<Vec<RawEvent>> {
        let pool = &self.pool;
        self.retry
            .run_if(
                move || async move {
                    let conn = pool.acquire().await?;
                    conn.get_logs(query).await
                },
                SentinelError::is_transient,
            )
            .await
            .map_err(|e| match e {
                SentinelError::RpcError { .. } => SentinelError::log_fetch(
                    format!(
                        "logs for {} in [{}, {}] unavailable",
                        query.address, query.from_block, query.to_block
                    ),
                    Some(Box::new(e)),
                ),
                other => other,
            })
    }

    /// Gas used by a transaction, `None` when the receipt is missing.
    ///
    /// # Errors
    ///
    /// Returns the last transient error after retries.
    pub async fn gas_used(&self, tx_hash: B256) -> SentinelResult<Option<u64>> {
        let pool = &self.pool;
        self.retry
            .run_if(
                move || async move {
                    let conn = pool.acquire().await?;
                    conn.gas_used(tx_hash).await
                },
                SentinelError::is_transient,
            )
            .await
    }
}
