//! Tiered Cache - write-through caching layer
//!
//! A pooled Redis backend fronted by an in-process fallback store, plus axum
//! middleware that caches read-only handlers.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod service;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use error::{CacheError, Result};
pub use middleware::{response_cache, ResponseCache};
pub use service::{CacheItem, CacheService};
pub use tasks::spawn_cleanup_task;
