//! Connection Pool
//!
//! Fixed-size set of independently supervised Redis connections handed out
//! round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::connection::{ConnectionState, PooledConnection, RetryPolicy};
use crate::config::{BackendConfig, MAX_POOL_SIZE};
use crate::error::{CacheError, Result};

/// How often `wait_until_ready` re-checks connection states.
const READY_POLL: Duration = Duration::from_millis(25);

// == Lease ==
/// A connection handed out by [`ConnectionPool::next`].
pub struct Lease {
    /// Index of the pooled connection, for failure reports
    pub id: usize,
    pub conn: MultiplexedConnection,
}

// == Connection Pool ==
pub struct ConnectionPool {
    connections: Vec<PooledConnection>,
    cursor: AtomicUsize,
    url: String,
}

impl ConnectionPool {
    // == Open ==
    /// Parses the address and starts `pool_size` connection supervisors.
    ///
    /// Returns as soon as the supervisors are running; use
    /// [`wait_until_ready`](Self::wait_until_ready) to wait for the first
    /// live connection.
    pub async fn open(config: &BackendConfig) -> Result<Self> {
        if !(1..=MAX_POOL_SIZE).contains(&config.pool_size) {
            return Err(CacheError::Configuration(format!(
                "pool size must be between 1 and {}, got {}",
                MAX_POOL_SIZE, config.pool_size
            )));
        }

        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::Configuration(format!("invalid backend address {:?}: {}", config.url, e))
        })?;

        let policy = RetryPolicy::from_config(config);
        let connections: Vec<PooledConnection> = (0..config.pool_size)
            .map(|id| PooledConnection::new(id, client.clone(), policy))
            .collect();

        for conn in &connections {
            conn.start().await;
        }

        info!(
            url = %config.url,
            pool_size = config.pool_size,
            "Backend connection pool opening"
        );

        Ok(Self {
            connections,
            cursor: AtomicUsize::new(0),
            url: config.url.clone(),
        })
    }

    /// Waits until one connection is live, every connection has failed, or
    /// `limit` elapses. Returns whether the pool is connected.
    pub async fn wait_until_ready(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;

        loop {
            let states = self.states().await;
            if states.contains(&ConnectionState::Connected) {
                info!(url = %self.url, "Backend connected");
                return true;
            }
            if states
                .iter()
                .all(|s| matches!(s, ConnectionState::Failed | ConnectionState::Closed))
            {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(READY_POLL).await;
        }

        warn!(url = %self.url, "Backend not reachable, running on fallback store");
        false
    }

    // == Next ==
    /// Advances the cursor and returns the first live connection at or after
    /// it, or `None` when nothing in the pool is connected.
    pub async fn next(&self) -> Option<Lease> {
        let size = self.connections.len();
        if size == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % size;
        for index in probe_order(start, size) {
            let pooled = &self.connections[index];
            if let Some(conn) = pooled.lease().await {
                return Some(Lease {
                    id: pooled.id(),
                    conn,
                });
            }
        }
        None
    }

    /// Reports a transport-level failure on a leased connection.
    pub async fn report_failure(&self, id: usize, reason: &CacheError) {
        if let Some(pooled) = self.connections.get(id) {
            pooled.mark_broken(reason).await;
        }
    }

    /// Whether at least one connection is live.
    pub async fn is_connected(&self) -> bool {
        for pooled in &self.connections {
            if pooled.state().await == ConnectionState::Connected {
                return true;
            }
        }
        false
    }

    /// Current state of every connection, in pool order.
    pub async fn states(&self) -> Vec<ConnectionState> {
        let mut states = Vec::with_capacity(self.connections.len());
        for pooled in &self.connections {
            states.push(pooled.state().await);
        }
        states
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    // == Shutdown ==
    /// Stops every supervisor and drops every connection.
    pub async fn shutdown(&self) {
        for pooled in &self.connections {
            pooled.close().await;
        }
        info!(url = %self.url, "Backend connection pool closed");
    }
}

/// Indices visited by `next`: every slot once, starting at `start`.
fn probe_order(start: usize, size: usize) -> impl Iterator<Item = usize> {
    (0..size).map(move |offset| (start + offset) % size)
}
