//! Integration Tests against a live Redis backend
//!
//! Each test runs only when `REDIS_URL` points at a reachable server and is
//! skipped otherwise. Keys are namespaced per process so parallel runs do not
//! collide.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tiered_cache::backend::{ConnectionPool, ConnectionState};
use tiered_cache::service::BackendMode;
use tiered_cache::{CacheError, CacheItem, CacheService, Config};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id: u64,
    title: String,
}

fn event(id: u64) -> Event {
    Event {
        id,
        title: format!("event {id}"),
    }
}

// == Helper Functions ==

fn backend_url() -> Option<String> {
    match std::env::var("REDIS_URL") {
        Ok(url) if !url.trim().is_empty() => Some(url),
        _ => {
            eprintln!("REDIS_URL not set, skipping backend test");
            None
        }
    }
}

fn prefix(test: &str) -> String {
    format!("tiered_cache_test:{}:{}", std::process::id(), test)
}

fn backend_config(url: &str) -> Config {
    let mut config = Config::default();
    config.backend.url = url.to_string();
    config.backend.pool_size = 2;
    config.backend.connect_timeout = Duration::from_secs(2);
    config
}

/// A fresh service with an empty fallback store, so anything it reads was
/// served by the backend.
async fn connected_service(url: &str) -> CacheService {
    let service = CacheService::new(backend_config(url));
    service.init().await.unwrap();
    assert!(service.is_backend_connected().await, "backend at {url} not reachable");
    service
}

async fn raw_connection(url: &str) -> MultiplexedConnection {
    redis::Client::open(url)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

// == Round Trip ==

#[tokio::test]
async fn test_backend_round_trip_across_instances() {
    let Some(url) = backend_url() else { return };
    let key = format!("{}:1", prefix("round_trip"));

    let writer = connected_service(&url).await;
    writer.set(&key, &event(1), 60).await;

    let reader = connected_service(&url).await;
    assert_eq!(reader.fallback_len().await, 0);
    assert_eq!(reader.get::<Event>(&key).await, Some(event(1)));
    assert_eq!(reader.health().await.backend, BackendMode::Connected);

    reader.del([key.as_str()]).await;
    assert_eq!(writer.get::<Event>(&key).await, Some(event(1)), "writer fallback keeps its copy");
    let mut raw = raw_connection(&url).await;
    let exists: bool = raw.exists(&key).await.unwrap();
    assert!(!exists);

    writer.shutdown().await;
    reader.shutdown().await;
}

#[tokio::test]
async fn test_backend_ttl_applied() {
    let Some(url) = backend_url() else { return };
    let key = format!("{}:ttl", prefix("ttl"));

    let service = connected_service(&url).await;
    service.set(&key, &event(2), 30).await;

    let mut raw = raw_connection(&url).await;
    let ttl: i64 = raw.ttl(&key).await.unwrap();
    assert!((1..=30).contains(&ttl), "unexpected ttl {ttl}");

    service.del([key.as_str()]).await;
    service.shutdown().await;
}

// == Batch Operations ==

#[tokio::test]
async fn test_mget_merges_backend_and_fallback() {
    let Some(url) = backend_url() else { return };
    let base = prefix("mget");
    let remote_only = format!("{base}:remote");
    let local_only = format!("{base}:local");
    let absent = format!("{base}:absent");

    let service = connected_service(&url).await;
    let mut raw = raw_connection(&url).await;

    raw.set::<_, _, ()>(&remote_only, serde_json::to_string(&event(10)).unwrap())
        .await
        .unwrap();
    service.set(&local_only, &event(20), 60).await;
    raw.del::<_, ()>(&local_only).await.unwrap();

    let values = service
        .mget::<Event, _>(&[absent.as_str(), remote_only.as_str(), local_only.as_str()])
        .await;

    assert_eq!(values, vec![None, Some(event(10)), Some(event(20))]);
    let stats = service.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.errors, 0);

    service.clear_pattern(&format!("{base}:*")).await;
    service.shutdown().await;
}

#[tokio::test]
async fn test_mset_pipeline_reaches_backend() {
    let Some(url) = backend_url() else { return };
    let base = prefix("mset");

    let writer = connected_service(&url).await;
    let items: Vec<CacheItem<Event>> = (0..5)
        .map(|i| CacheItem::new(format!("{base}:{i}"), event(i), 60))
        .collect();
    writer.mset(&items).await;

    let reader = connected_service(&url).await;
    let keys: Vec<String> = (0..5).map(|i| format!("{base}:{i}")).collect();
    let values = reader.mget::<Event, _>(&keys).await;

    assert_eq!(values, (0..5).map(|i| Some(event(i))).collect::<Vec<_>>());
    assert_eq!(reader.fallback_len().await, 0);

    reader.clear_pattern(&format!("{base}:*")).await;
    writer.shutdown().await;
    reader.shutdown().await;
}

// == Pattern Invalidation ==

#[tokio::test]
async fn test_clear_pattern_walks_every_scan_page() {
    let Some(url) = backend_url() else { return };
    let base = prefix("scan");

    let writer = connected_service(&url).await;
    let items: Vec<CacheItem<u64>> = (0..250)
        .map(|i| CacheItem::new(format!("{base}:user:{i}"), i, 120))
        .collect();
    writer.mset(&items).await;
    writer.set(&format!("{base}:post:1"), &1u64, 120).await;

    let cleaner = connected_service(&url).await;
    let removed = cleaner.clear_pattern(&format!("{base}:user:*")).await;
    assert_eq!(removed, 250);

    let mut raw = raw_connection(&url).await;
    let survivor: bool = raw.exists(format!("{base}:post:1")).await.unwrap();
    let sample: bool = raw.exists(format!("{base}:user:199")).await.unwrap();
    assert!(survivor);
    assert!(!sample);

    cleaner.clear_pattern(&format!("{base}:*")).await;
    writer.shutdown().await;
    cleaner.shutdown().await;
}

#[tokio::test]
async fn test_clear_pattern_treats_brackets_literally_on_backend() {
    let Some(url) = backend_url() else { return };
    let base = prefix("brackets");
    let key = format!("{base}:route:/items?filter[a]=1");

    let writer = connected_service(&url).await;
    writer.set(&key, &"cached page", 60).await;

    let cleaner = connected_service(&url).await;
    let removed = cleaner
        .clear_pattern(&format!("{base}:route:/items?filter[a]=*"))
        .await;
    assert_eq!(removed, 1);

    let mut raw = raw_connection(&url).await;
    let exists: bool = raw.exists(&key).await.unwrap();
    assert!(!exists);

    writer.shutdown().await;
    cleaner.shutdown().await;
}

// == Reconnect ==

#[tokio::test]
async fn test_broken_connection_reconnects() {
    let Some(url) = backend_url() else { return };
    let config = backend_config(&url);

    let pool = ConnectionPool::open(&config.backend).await.unwrap();
    assert!(pool.wait_until_ready(Duration::from_secs(2)).await);
    for _ in 0..40 {
        if pool.states().await.iter().all(|s| *s == ConnectionState::Connected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    pool.report_failure(0, &CacheError::BackendUnavailable("connection reset".to_string()))
        .await;
    assert_ne!(pool.states().await[0], ConnectionState::Failed);

    let mut reconnected = false;
    for _ in 0..80 {
        if pool.states().await[0] == ConnectionState::Connected {
            reconnected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(reconnected, "connection 0 did not come back");

    let mut lease = pool.next().await.unwrap();
    let pong: String = redis::cmd("PING")
        .query_async(&mut lease.conn)
        .await
        .unwrap();
    assert_eq!(pong, "PONG");

    pool.shutdown().await;
    assert!(pool
        .states()
        .await
        .iter()
        .all(|s| *s == ConnectionState::Closed));
}
