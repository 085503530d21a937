//! Configuration Module
//!
//! Loads backend, fallback and server settings from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Largest pool size accepted at startup.
pub const MAX_POOL_SIZE: usize = 64;

// == Backend Config ==
/// Settings for the pooled Redis backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Redis connection URL
    pub url: String,
    /// Number of parallel connections
    pub pool_size: usize,
    /// Skip pool creation entirely and run fallback-only
    pub disabled: bool,
    /// Timeout for connecting and for each command
    pub connect_timeout: Duration,
    /// Consecutive failed attempts before a connection gives up
    pub max_retries: u32,
    /// Upper bound on the per-connection reconnect delay
    pub max_backoff: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 3,
            disabled: false,
            connect_timeout: Duration::from_millis(2000),
            max_retries: 5,
            max_backoff: Duration::from_secs(3),
        }
    }
}

// == Fallback Config ==
/// Capacity thresholds for the in-process fallback store.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Size above which a cleanup pass runs
    pub max_entries: usize,
    /// Size the store is brought back to when cleanup alone is not enough
    pub target_entries: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            target_entries: 4000,
        }
    }
}

// == Config ==
/// Process configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub backend: BackendConfig,
    pub fallback: FallbackConfig,
    pub server: ServerConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server port
    pub port: u16,
    /// Default TTL in seconds for writes that do not specify one
    pub default_ttl: u64,
    /// Background fallback sweep interval in seconds
    pub cleanup_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            default_ttl: 300,
            cleanup_interval: 60,
        }
    }
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - Backend address (default: redis://127.0.0.1:6379)
    /// - `REDIS_POOL_SIZE` - Parallel connections, 1..=64 (default: 3)
    /// - `REDIS_DISABLED` - `true`/`1` runs fallback-only (default: false)
    /// - `REDIS_CONNECT_TIMEOUT_MS` - Connect/command timeout (default: 2000)
    /// - `REDIS_MAX_RETRIES` - Attempts before a connection fails (default: 5)
    /// - `FALLBACK_MAX_ENTRIES` - Fallback sweep trigger (default: 5000)
    /// - `FALLBACK_TARGET_ENTRIES` - Fallback eviction target (default: 4000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    ///
    /// A pool size that is not a number or out of range is a configuration
    /// error; other unparsable values fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let pool_size = match env::var("REDIS_POOL_SIZE") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                CacheError::Configuration(format!("REDIS_POOL_SIZE is not a number: {raw:?}"))
            })?,
            Err(_) => defaults.backend.pool_size,
        };

        let config = Self {
            backend: BackendConfig {
                url: env::var("REDIS_URL").unwrap_or(defaults.backend.url),
                pool_size,
                disabled: env::var("REDIS_DISABLED")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(false),
                connect_timeout: Duration::from_millis(env_or(
                    "REDIS_CONNECT_TIMEOUT_MS",
                    defaults.backend.connect_timeout.as_millis() as u64,
                )),
                max_retries: env_or("REDIS_MAX_RETRIES", defaults.backend.max_retries),
                max_backoff: defaults.backend.max_backoff,
            },
            fallback: FallbackConfig {
                max_entries: env_or("FALLBACK_MAX_ENTRIES", defaults.fallback.max_entries),
                target_entries: env_or("FALLBACK_TARGET_ENTRIES", defaults.fallback.target_entries),
            },
            server: ServerConfig {
                port: env_or("SERVER_PORT", defaults.server.port),
                default_ttl: env_or("DEFAULT_TTL", defaults.server.default_ttl),
                cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.server.cleanup_interval),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the cache cannot start with.
    pub fn validate(&self) -> Result<()> {
        if !self.backend.disabled && !(1..=MAX_POOL_SIZE).contains(&self.backend.pool_size) {
            return Err(CacheError::Configuration(format!(
                "pool size must be between 1 and {}, got {}",
                MAX_POOL_SIZE, self.backend.pool_size
            )));
        }
        if self.fallback.target_entries > self.fallback.max_entries {
            return Err(CacheError::Configuration(format!(
                "fallback target ({}) exceeds fallback maximum ({})",
                self.fallback.target_entries, self.fallback.max_entries
            )));
        }
        Ok(())
    }

    /// Configuration for running without a backend, mostly for tests.
    pub fn fallback_only() -> Self {
        let mut config = Self::default();
        config.backend.disabled = true;
        config
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
