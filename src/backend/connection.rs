//! Pooled Connection
//!
//! One Redis connection with its own connect/retry lifecycle. A supervisor
//! task owns the reconnect loop so a slow or broken connection never holds
//! up the rest of the pool.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::error::{CacheError, Result};

/// First reconnect delay; doubles per attempt up to the policy maximum.
const BASE_BACKOFF: Duration = Duration::from_millis(100);

// == Connection State ==
/// Lifecycle of a single pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// First connect attempt in flight
    Connecting,
    /// Passed the liveness probe and serving commands
    Connected,
    /// Waiting out the backoff before attempt `attempt + 1`
    Retrying { attempt: u32 },
    /// Gave up after the configured number of attempts
    Failed,
    /// Shut down by the pool
    Closed,
}

// == Retry Policy ==
/// Connect timeout and bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            max_retries: config.max_retries.max(1),
            max_backoff: config.max_backoff,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        BASE_BACKOFF.saturating_mul(factor).min(self.max_backoff)
    }
}

struct Slot {
    state: ConnectionState,
    conn: Option<MultiplexedConnection>,
    supervisor: Option<JoinHandle<()>>,
}

// == Pooled Connection ==
/// Shared handle to one slot of the pool.
#[derive(Clone)]
pub struct PooledConnection {
    id: usize,
    client: redis::Client,
    policy: RetryPolicy,
    slot: Arc<RwLock<Slot>>,
}

impl PooledConnection {
    /// Creates the connection in `Connecting` state without dialing.
    pub fn new(id: usize, client: redis::Client, policy: RetryPolicy) -> Self {
        Self {
            id,
            client,
            policy,
            slot: Arc::new(RwLock::new(Slot {
                state: ConnectionState::Connecting,
                conn: None,
                supervisor: None,
            })),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub async fn state(&self) -> ConnectionState {
        self.slot.read().await.state
    }

    /// Starts the supervisor that drives this connection to `Connected` or `Failed`.
    pub async fn start(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.supervise().await });

        let mut slot = self.slot.write().await;
        if let Some(previous) = slot.supervisor.replace(handle) {
            previous.abort();
        }
    }

    /// Returns a clone of the live connection, or `None` unless `Connected`.
    pub async fn lease(&self) -> Option<MultiplexedConnection> {
        let slot = self.slot.read().await;
        match slot.state {
            ConnectionState::Connected => slot.conn.clone(),
            _ => None,
        }
    }

    /// Drops a connection whose command failed at the transport level and
    /// starts reconnecting it. No-op unless currently `Connected`.
    pub async fn mark_broken(&self, reason: &CacheError) {
        {
            let mut slot = self.slot.write().await;
            if slot.state != ConnectionState::Connected {
                return;
            }
            slot.state = ConnectionState::Retrying { attempt: 0 };
            slot.conn = None;
        }

        warn!(connection = self.id, error = %reason, "Backend connection lost, reconnecting");
        self.start().await;
    }

    /// Stops the supervisor and releases the connection for good.
    pub async fn close(&self) {
        let mut slot = self.slot.write().await;
        if let Some(handle) = slot.supervisor.take() {
            handle.abort();
        }
        slot.conn = None;
        slot.state = ConnectionState::Closed;
    }

    async fn supervise(self) {
        let mut attempt: u32 = 0;

        loop {
            match self.try_connect().await {
                Ok(conn) => {
                    let mut slot = self.slot.write().await;
                    if slot.state == ConnectionState::Closed {
                        return;
                    }
                    slot.conn = Some(conn);
                    slot.state = ConnectionState::Connected;
                    info!(connection = self.id, attempt = attempt + 1, "Backend connection ready");
                    return;
                }
                Err(e) => {
                    attempt += 1;

                    let mut slot = self.slot.write().await;
                    if slot.state == ConnectionState::Closed {
                        return;
                    }

                    if attempt >= self.policy.max_retries {
                        slot.state = ConnectionState::Failed;
                        error!(
                            connection = self.id,
                            attempts = attempt,
                            error = %e,
                            "Backend connection gave up, serving from fallback"
                        );
                        return;
                    }

                    slot.state = ConnectionState::Retrying { attempt };
                    drop(slot);

                    let delay = self.policy.backoff(attempt);
                    debug!(
                        connection = self.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Backend connect failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Dials the backend and runs a `PING` liveness probe.
    async fn try_connect(&self) -> Result<MultiplexedConnection> {
        let limit = self.policy.connect_timeout;

        let mut conn = timeout(limit, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::BackendUnavailable("connect timed out".to_string()))??;

        let ping = redis::cmd("PING");
        let pong: String = timeout(limit, ping.query_async(&mut conn))
            .await
            .map_err(|_| CacheError::BackendUnavailable("liveness probe timed out".to_string()))??;

        if pong != "PONG" {
            return Err(CacheError::BackendUnavailable(format!(
                "unexpected liveness reply: {pong}"
            )));
        }

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            max_retries: 2,
            max_backoff: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(6), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_policy_requires_one_attempt() {
        let mut config = BackendConfig::default();
        config.max_retries = 0;
        assert_eq!(RetryPolicy::from_config(&config).max_retries, 1);
    }

    #[tokio::test]
    async fn test_unreachable_connection_fails() {
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        let conn = PooledConnection::new(0, client, policy());
        assert_eq!(conn.state().await, ConnectionState::Connecting);

        conn.start().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(conn.state().await, ConnectionState::Failed);
        assert!(conn.lease().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        let conn = PooledConnection::new(0, client, policy());

        conn.start().await;
        conn.close().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(conn.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_mark_broken_ignored_unless_connected() {
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        let conn = PooledConnection::new(0, client, policy());

        conn.mark_broken(&CacheError::BackendUnavailable("test".to_string()))
            .await;

        assert_eq!(conn.state().await, ConnectionState::Connecting);
    }
}
