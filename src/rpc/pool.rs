//! Bounded pool of chain-node connections.
//!
//! Connections are created once, round-robin over the configured endpoints,
//! and checked once with [`ChainClient::is_connected`]. They are never
//! re-validated: a connection that dies later is only noticed by the call
//! that uses it, which the [`RetryExecutor`](super::RetryExecutor) then retries
//! on the next connection in line.
//!
//! Leases are RAII guards. Dropping a [`PooledConnection`] returns the
//! connection on every exit path, so a connection cannot be released twice
//! or released into a pool it did not come from.

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use super::ChainClient;
use crate::error::{SentinelError, SentinelResult};

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Requested number of connections
    pub capacity: usize,
    /// Connections that passed the liveness check
    pub size: usize,
    /// Connections currently idle
    pub available: usize,
    /// Connections currently leased
    pub leased: usize,
}

/// Fixed-size pool with blocking, time-bounded acquisition.
#[derive(Debug)]
pub struct ConnectionPool<C> {
    idle: Mutex<VecDeque<C>>,
    permits: Semaphore,
    capacity: usize,
    size: usize,
    acquire_timeout: Duration,
}

impl<C: ChainClient> ConnectionPool<C> {
    /// Create `capacity` connections round-robin over `endpoints`.
    ///
    /// Connections whose factory call fails or whose liveness check fails are
    /// logged and left out; the pool then runs with fewer connections.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `endpoints` is empty, `capacity` is
    /// zero, or no connection passes the liveness check.
    pub async fn connect<F, Fut>(
        endpoints: &[String],
        capacity: usize,
        acquire_timeout: Duration,
        factory: F,
    ) -> SentinelResult<Self>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = SentinelResult<C>>,
    {
        if endpoints.is_empty() {
            return Err(SentinelError::config("at least one RPC endpoint is required", None));
        }
        if capacity == 0 {
            return Err(SentinelError::config("pool size must be at least 1", None));
        }

        let mut connections = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let url = &endpoints[i % endpoints.len()];
            match factory(url.clone()).await {
                Ok(conn) if conn.is_connected().await => {
                    info!(
                        endpoint = conn.endpoint(),
                        "Added connection {}/{} to pool",
                        i + 1,
                        capacity
                    );
                    connections.push(conn);
                }
                Ok(conn) => {
                    warn!(endpoint = conn.endpoint(), "Connection {} failed liveness check", i + 1);
                }
                Err(e) => {
                    error!(error = %e, "Failed to create connection {}", i + 1);
                }
            }
        }

        if connections.is_empty() {
            return Err(SentinelError::config(
                "no RPC endpoint passed the liveness check",
                None,
            ));
        }

        let mut pool = Self::from_connections(connections, acquire_timeout);
        pool.capacity = capacity;
        Ok(pool)
    }
}

impl<C> ConnectionPool<C> {
    /// Wrap already-established connections without probing them.
    #[must_use]
    pub fn from_connections(connections: Vec<C>, acquire_timeout: Duration) -> Self {
        let size = connections.len();
        Self {
            idle: Mutex::new(connections.into_iter().collect()),
            permits: Semaphore::new(size),
            capacity: size,
            size,
            acquire_timeout,
        }
    }

    /// Lease a connection, waiting up to the configured acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::PoolExhausted`] if none frees up in time.
    pub async fn acquire(&self) -> SentinelResult<PooledConnection<'_, C>> {
        self.acquire_within(self.acquire_timeout).await
    }

    /// Lease a connection, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::PoolExhausted`] if none frees up in time.
    pub async fn acquire_within(&self, timeout: Duration) -> SentinelResult<PooledConnection<'_, C>> {
        let permit = match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                debug!(timeout_ms = timeout.as_millis(), "Connection pool exhausted");
                return Err(SentinelError::pool_exhausted(timeout));
            }
        };

        // One permit per idle connection, so the queue cannot be empty here.
        let conn = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| SentinelError::pool_exhausted(timeout))?;

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }

    /// Current occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self.permits.available_permits();
        PoolStatus {
            capacity: self.capacity,
            size: self.size,
            available,
            leased: self.size.saturating_sub(available),
        }
    }

    /// Number of live connections.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    fn release(&self, conn: C) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(conn);
    }
}

/// A leased connection. Returned to the pool when dropped.
#[derive(Debug)]
pub struct PooledConnection<'a, C> {
    conn: Option<C>,
    pool: &'a ConnectionPool<C>,
    // Field order matters: the connection is pushed back in `drop` before
    // the permit is released.
    _permit: SemaphorePermit<'a>,
}

impl<C> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl<C> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockChainClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_beyond_capacity_times_out() {
        let pool = ConnectionPool::from_connections(
            vec![MockChainClient::default(), MockChainClient::default()],
            Duration::from_millis(500),
        );

        let first = pool.acquire().await;
        let second = pool.acquire().await;
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(pool.status().leased, 2);

        let third = pool.acquire().await;
        assert!(matches!(third, Err(SentinelError::PoolExhausted { .. })));

        drop(first);
        assert_eq!(pool.status().available, 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_acquire_succeeds_after_release() {
        let pool = Arc::new(ConnectionPool::from_connections(
            vec![MockChainClient::default()],
            Duration::from_secs(5),
        ));

        let held = pool.acquire().await;
        assert!(held.is_ok());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(held);

        let result = waiter.await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_never_exceeds_pool_size() {
        const POOL_SIZE: usize = 3;
        let pool = Arc::new(ConnectionPool::from_connections(
            (0..POOL_SIZE).map(|_| MockChainClient::default()).collect(),
            Duration::from_secs(5),
        ));
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                if let Ok(_conn) = pool.acquire().await {
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_use.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        assert!(peak.load(Ordering::SeqCst) <= POOL_SIZE);
        assert_eq!(pool.status().available, POOL_SIZE);
    }

    #[tokio::test]
    async fn test_connect_round_robin_and_liveness_check() {
        let endpoints = vec!["http://a".to_string(), "http://b".to_string()];
        let created = Arc::new(Mutex::new(Vec::new()));

        let pool = {
            let created = created.clone();
            ConnectionPool::connect(&endpoints, 4, Duration::from_secs(1), move |url| {
                let created = created.clone();
                async move {
                    created.lock().unwrap_or_else(PoisonError::into_inner).push(url.clone());
                    let client = MockChainClient::with_head(1);
                    if url == "http://b" {
                        // Endpoint b is down: its liveness check fails.
                        client.fail_head_times(1);
                    }
                    Ok(client)
                }
            })
            .await
        };

        let urls = created.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(urls, vec!["http://a", "http://b", "http://a", "http://b"]);

        assert!(pool.is_ok());
        if let Ok(pool) = pool {
            assert_eq!(pool.size(), 2);
            assert_eq!(pool.status().capacity, 4);
        }
    }

    #[tokio::test]
    async fn test_connect_fails_without_live_connections() {
        let result = ConnectionPool::connect(
            &["http://down".to_string()],
            2,
            Duration::from_secs(1),
            |_| async { Err::<MockChainClient, _>(SentinelError::rpc("refused", None)) },
        )
        .await;
        assert!(matches!(result, Err(SentinelError::ConfigError { .. })));
    }
}
