//! Cache Service
//!
//! Orchestrates the two tiers. Writes go to the fallback store first and
//! then through to the backend; reads try the backend first and fall back.
//! No operation fails its caller: backend and serialization problems are
//! logged, counted in the stats and turned into a fallback attempt or an
//! absent result.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{ConnectionPool, ConnectionState};
use crate::cache::{CacheStats, FallbackStore, KeyPattern, StatsSnapshot};
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Keys requested per `SCAN` page during pattern invalidation.
const SCAN_PAGE_SIZE: usize = 100;

// == Cache Item ==
/// One entry of a batched write.
#[derive(Debug, Clone)]
pub struct CacheItem<T> {
    pub key: String,
    pub value: T,
    pub ttl: u64,
}

impl<T> CacheItem<T> {
    pub fn new(key: impl Into<String>, value: T, ttl: u64) -> Self {
        Self {
            key: key.into(),
            value,
            ttl,
        }
    }
}

// == Health Report ==
/// Backend mode as seen by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Pool creation skipped by configuration
    Disabled,
    /// At least one pooled connection is live
    Connected,
    /// Pool exists but nothing is live; serving from the fallback store
    Disconnected,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub backend: BackendMode,
    pub connections: Vec<ConnectionState>,
    pub fallback_entries: usize,
}

// == Cache Service ==
/// Write-through cache over a pooled Redis backend and an in-process fallback.
///
/// Construct once per process, share as `Arc<CacheService>`, call
/// [`init`](Self::init) before use and [`shutdown`](Self::shutdown) on exit.
/// Concurrent writers to one key are last-write-wins.
pub struct CacheService {
    config: Config,
    pool: RwLock<Option<Arc<ConnectionPool>>>,
    fallback: RwLock<FallbackStore>,
    stats: Mutex<CacheStats>,
}

impl CacheService {
    // == Constructor ==
    /// Creates the service without touching the network.
    pub fn new(config: Config) -> Self {
        let fallback = FallbackStore::from_config(&config.fallback);
        Self {
            config,
            pool: RwLock::new(None),
            fallback: RwLock::new(fallback),
            stats: Mutex::new(CacheStats::new()),
        }
    }

    // == Lifecycle ==
    /// Opens the backend pool unless disabled and waits up to the connect
    /// timeout for a first live connection.
    ///
    /// Only configuration problems are returned; an unreachable backend
    /// leaves the service in fallback-only operation.
    pub async fn init(&self) -> Result<()> {
        self.config.validate()?;

        if self.config.backend.disabled {
            info!("Backend disabled, cache running on fallback store only");
            return Ok(());
        }

        let pool = Arc::new(ConnectionPool::open(&self.config.backend).await?);
        pool.wait_until_ready(self.config.backend.connect_timeout)
            .await;

        if let Some(previous) = self.pool.write().await.replace(pool) {
            previous.shutdown().await;
        }
        Ok(())
    }

    /// Closes every pooled connection. The fallback store stays usable.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.shutdown().await;
        }
        info!("Cache service shut down");
    }

    // == Get ==
    /// Looks `key` up in the backend, then the fallback store.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();

        let mut found = None;
        if let Some(Some(payload)) = self
            .with_backend("GET", |mut conn| async move {
                conn.get::<_, Option<String>>(key).await
            })
            .await
        {
            found = self.decode(key, &payload).await;
        }

        if found.is_none() {
            found = self.fallback_lookup(key).await;
        }

        let mut stats = self.stats.lock().await;
        if found.is_some() {
            stats.record_hit();
            debug!(key = %key, "cache hit");
        } else {
            stats.record_miss();
            debug!(key = %key, "cache miss");
        }
        stats.record_get_time(started.elapsed());

        found
    }

    // == Multi Get ==
    /// Batched lookup preserving input order. One `MGET` round trip when the
    /// backend is up; gaps are filled from the fallback store.
    pub async fn mget<T, K>(&self, keys: &[K]) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        if keys.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();
        let names: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();

        let remote = self
            .with_backend("MGET", |mut conn| {
                let names = names.clone();
                async move {
                    redis::cmd("MGET")
                        .arg(&names)
                        .query_async::<Vec<Option<String>>>(&mut conn)
                        .await
                }
            })
            .await
            .filter(|values| values.len() == names.len())
            .unwrap_or_else(|| vec![None; names.len()]);

        let mut results = Vec::with_capacity(names.len());
        for (key, payload) in names.iter().zip(remote) {
            let mut found = match payload {
                Some(payload) => self.decode(key, &payload).await,
                None => None,
            };
            if found.is_none() {
                found = self.fallback_lookup(key).await;
            }
            results.push(found);
        }

        let mut stats = self.stats.lock().await;
        for found in &results {
            if found.is_some() {
                stats.record_hit();
            } else {
                stats.record_miss();
            }
        }
        stats.record_get_time(started.elapsed());

        results
    }

    // == Set ==
    /// Writes `value` to the fallback store immediately, then to the backend
    /// with the same TTL. A TTL of zero is treated as one second.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: u64) {
        let started = Instant::now();
        let ttl = ttl.max(1);

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.record_error("SET", key, &CacheError::from(e)).await;
                return;
            }
        };

        let swept = self
            .fallback
            .write()
            .await
            .set(key.to_string(), payload.clone(), ttl);
        if swept > 0 {
            debug!(removed = swept, "fallback store swept");
        }

        self.with_backend("SET", |mut conn| async move {
            conn.set_ex::<_, _, ()>(key, payload, ttl).await
        })
        .await;

        let mut stats = self.stats.lock().await;
        stats.record_set();
        stats.record_set_time(started.elapsed());
    }

    // == Multi Set ==
    /// Batched write-through: every item lands in the fallback store first,
    /// then all of them go to the backend in one pipeline.
    pub async fn mset<T: Serialize>(&self, items: &[CacheItem<T>]) {
        if items.is_empty() {
            return;
        }
        let started = Instant::now();

        let mut encoded = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::to_string(&item.value) {
                Ok(payload) => encoded.push((item.key.as_str(), payload, item.ttl.max(1))),
                Err(e) => self.record_error("MSET", &item.key, &CacheError::from(e)).await,
            }
        }

        {
            let mut fallback = self.fallback.write().await;
            for (key, payload, ttl) in &encoded {
                fallback.set(key.to_string(), payload.clone(), *ttl);
            }
        }

        if !encoded.is_empty() {
            let mut pipe = redis::pipe();
            for (key, payload, ttl) in &encoded {
                pipe.set_ex(*key, payload, *ttl).ignore();
            }
            self.with_backend("MSET", |mut conn| async move {
                pipe.query_async::<()>(&mut conn).await
            })
            .await;
        }

        let mut stats = self.stats.lock().await;
        for _ in &encoded {
            stats.record_set();
        }
        stats.record_set_time(started.elapsed());
    }

    // == Delete ==
    /// Removes keys from both tiers. Absent keys are ignored.
    ///
    /// Accepts a single key (`["user:1"]`) or any collection of keys.
    pub async fn del<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            return;
        }

        {
            let mut fallback = self.fallback.write().await;
            for key in &keys {
                fallback.delete(key);
            }
        }

        self.with_backend("DEL", |mut conn| async move {
            conn.del::<_, ()>(&keys).await
        })
        .await;
    }

    // == Clear Pattern ==
    /// Removes every key matching a glob (`*`, `?`) from both tiers and
    /// returns how many entries were removed.
    ///
    /// The backend is walked with paginated `SCAN` and each page's matches
    /// are deleted with a single `DEL`.
    pub async fn clear_pattern(&self, glob: &str) -> u64 {
        let pattern = match KeyPattern::new(glob) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(pattern = %glob, error = %e, "Ignoring invalid pattern");
                return 0;
            }
        };

        let local = self.fallback.write().await.remove_matching(&pattern) as u64;

        let remote = self
            .with_backend("SCAN", |mut conn| {
                let glob = pattern.scan_glob();
                async move { scan_and_delete(&mut conn, glob).await }
            })
            .await
            .unwrap_or(0);

        info!(pattern = %glob, local, remote, "Cleared cache pattern");
        local + remote
    }

    // == Cacheable ==
    /// Read-through memoization: returns the cached value under `key`, or
    /// awaits `producer`, caches its output for `ttl` seconds and returns it.
    ///
    /// `producer` runs at most once per call; a producer error is returned
    /// as-is and nothing is cached. Concurrent callers missing the same key
    /// each run their own producer.
    pub async fn cacheable<T, E, F, Fut>(&self, key: &str, producer: F, ttl: u64) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    // == Stats ==
    /// Snapshot of counters and derived rates.
    pub async fn stats(&self) -> StatsSnapshot {
        self.stats.lock().await.snapshot()
    }

    // == Health ==
    pub async fn health(&self) -> HealthReport {
        let fallback_entries = self.fallback.read().await.len();

        let pool = self.pool.read().await.clone();
        let (backend, connections) = match pool {
            None if self.config.backend.disabled => (BackendMode::Disabled, Vec::new()),
            None => (BackendMode::Disconnected, Vec::new()),
            Some(pool) => {
                let states = pool.states().await;
                let mode = if states.contains(&ConnectionState::Connected) {
                    BackendMode::Connected
                } else {
                    BackendMode::Disconnected
                };
                (mode, states)
            }
        };

        HealthReport {
            backend,
            connections,
            fallback_entries,
        }
    }

    /// Whether any pooled connection is live.
    pub async fn is_backend_connected(&self) -> bool {
        match self.pool.read().await.clone() {
            Some(pool) => pool.is_connected().await,
            None => false,
        }
    }

    /// Removes expired fallback entries, returning how many were removed.
    pub async fn sweep_fallback(&self) -> usize {
        self.fallback.write().await.cleanup_expired()
    }

    /// Number of entries currently held by the fallback store.
    pub async fn fallback_len(&self) -> usize {
        self.fallback.read().await.len()
    }

    // == Internals ==
    /// Runs `op` on the next live pooled connection.
    ///
    /// Returns `None` when no connection is available or the command fails;
    /// failures are counted and transport failures reported to the pool.
    async fn with_backend<T, F, Fut>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let pool = self.pool.read().await.clone()?;
        let lease = pool.next().await?;

        let err = match tokio::time::timeout(self.command_timeout(), f(lease.conn)).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => CacheError::from(e),
            Err(_) => CacheError::BackendUnavailable(format!("{op} timed out")),
        };

        warn!(op, connection = lease.id, error = %err, "Backend command failed");
        self.stats.lock().await.record_error();
        if err.is_connection_failure() {
            pool.report_failure(lease.id, &err).await;
        }
        None
    }

    async fn fallback_lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.fallback.read().await.get(key).map(str::to_owned)?;
        self.decode(key, &payload).await
    }

    /// Decodes a stored payload; a malformed payload counts as an error and
    /// reads as absent.
    async fn decode<T: DeserializeOwned>(&self, key: &str, payload: &str) -> Option<T> {
        match serde_json::from_str(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error("DECODE", key, &CacheError::from(e)).await;
                None
            }
        }
    }

    async fn record_error(&self, op: &'static str, key: &str, err: &CacheError) {
        warn!(op, key = %key, error = %err, "Cache operation failed");
        self.stats.lock().await.record_error();
    }

    fn command_timeout(&self) -> Duration {
        self.config.backend.connect_timeout
    }
}

/// Walks the keyspace with `SCAN MATCH` and deletes each page's matches in
/// one `DEL`. Returns the number of keys deleted.
async fn scan_and_delete(conn: &mut MultiplexedConnection, glob: &str) -> RedisResult<u64> {
    let mut cursor: u64 = 0;
    let mut deleted: u64 = 0;

    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(glob)
            .arg("COUNT")
            .arg(SCAN_PAGE_SIZE)
            .query_async(conn)
            .await?;

        if !keys.is_empty() {
            let removed: u64 = conn.del(&keys).await?;
            deleted += removed;
        }

        cursor = next;
        if cursor == 0 {
            break;
        }
    }

    Ok(deleted)
}
