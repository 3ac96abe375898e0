//! Cache configuration.

use std::time::Duration;

/// Configuration for a [`ResourceCache`](crate::ResourceCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Aggregated discovery mode: a response naming resources is only sent
    /// when the requested names exactly match the container.
    pub ads: bool,
    /// Initial capacity of the per-namespace and per-node maps.
    pub initial_capacity: usize,
    /// Sends that wait longer than this for sink capacity are logged.
    ///
    /// Responses are delivered while the cache lock is held, so a slow
    /// subscriber stalls every other cache operation for this long.
    pub slow_send_threshold: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ads: false,
            initial_capacity: 64,
            slow_send_threshold: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Default configuration with aggregated discovery mode enabled.
    pub fn ads() -> Self {
        Self {
            ads: true,
            ..Default::default()
        }
    }
}
