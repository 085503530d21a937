//! Cache Statistics Module
//!
//! Running counters plus bounded latency windows; rates are derived only
//! when a snapshot is taken.

use std::time::Duration;

use serde::Serialize;

/// Samples kept per latency window before the oldest half is dropped.
pub const LATENCY_WINDOW: usize = 1000;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Lookups answered by either tier
    pub hits: u64,
    /// Lookups answered by neither tier
    pub misses: u64,
    /// Completed write operations
    pub sets: u64,
    /// Caught backend and serialization failures
    pub errors: u64,
    /// Recent `get`/`mget` durations in milliseconds
    get_times: Vec<f64>,
    /// Recent `set`/`mset` durations in milliseconds
    set_times: Vec<f64>,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Records a lookup duration.
    pub fn record_get_time(&mut self, elapsed: Duration) {
        push_sample(&mut self.get_times, elapsed);
    }

    /// Records a write duration.
    pub fn record_set_time(&mut self, elapsed: Duration) {
        push_sample(&mut self.set_times, elapsed);
    }

    // == Hit Rate ==
    /// Hits as a percentage of all lookups, 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            round2(self.hits as f64 * 100.0 / total as f64)
        }
    }

    // == Snapshot ==
    /// Derives the reporting view of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            errors: self.errors,
            hit_rate: self.hit_rate(),
            avg_get_time_ms: average(&self.get_times),
            avg_set_time_ms: average(&self.set_times),
        }
    }

    /// Number of retained lookup samples.
    pub fn get_samples(&self) -> usize {
        self.get_times.len()
    }
}

// == Stats Snapshot ==
/// Point-in-time statistics as exposed to callers and over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    /// Percentage in 0..=100
    pub hit_rate: f64,
    pub avg_get_time_ms: f64,
    pub avg_set_time_ms: f64,
}

fn push_sample(window: &mut Vec<f64>, elapsed: Duration) {
    window.push(elapsed.as_secs_f64() * 1000.0);
    if window.len() > LATENCY_WINDOW {
        window.drain(..LATENCY_WINDOW / 2);
    }
}

fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    round2(samples.iter().sum::<f64>() / samples.len() as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
