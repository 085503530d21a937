//! Fallback Sweep Task
//!
//! Background task that periodically removes expired fallback entries, on
//! top of the lazy expiry on read and the size-triggered sweep on write.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::CacheService;

/// Spawns a background task that sweeps the fallback store every
/// `cleanup_interval_secs` seconds.
///
/// Returns the task handle so the caller can abort it during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(CacheService::new(Config::fallback_only()));
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), 60);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<CacheService>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting fallback sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.sweep_fallback().await;

            if removed > 0 {
                info!("Fallback sweep: removed {} expired entries", removed);
            } else {
                debug!("Fallback sweep: no expired entries found");
            }
        }
    })
}
