//! Cache Module
//!
//! Local building blocks of the caching layer: the fallback tier, its
//! entries, key patterns and running statistics.

mod entry;
mod fallback;
mod pattern;
mod stats;


// Re-export public types
pub use entry::CacheEntry;
pub use fallback::FallbackStore;
pub use pattern::KeyPattern;
pub use stats::{CacheStats, StatsSnapshot, LATENCY_WINDOW};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum response body captured by the middleware, in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

/// Joins key segments with `:`, the separator every key in the platform uses.
///
/// ```
/// assert_eq!(tiered_cache::cache::build_key("user", &["42", "feed"]), "user:42:feed");
/// ```
pub fn build_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}
