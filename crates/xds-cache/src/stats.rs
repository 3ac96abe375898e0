//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for watch and update activity.
///
/// All counters are atomic and can be safely read while the cache is in use.
#[derive(Debug, Default)]
pub struct CacheStats {
    watches_opened: AtomicU64,
    delta_watches_opened: AtomicU64,
    responses_sent: AtomicU64,
    delta_responses_sent: AtomicU64,
    updates_applied: AtomicU64,
    fetch_hits: AtomicU64,
    fetch_skips: AtomicU64,
    fetch_misses: AtomicU64,
    ads_suppressions: AtomicU64,
}

impl CacheStats {
    /// Create new cache statistics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_watch(&self) {
        self.watches_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_delta_watch(&self) {
        self.delta_watches_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_response(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_delta_response(&self) {
        self.delta_responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_update(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_fetch_hit(&self) {
        self.fetch_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_fetch_skip(&self) {
        self.fetch_skips.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_fetch_miss(&self) {
        self.fetch_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_ads_suppression(&self) {
        self.ads_suppressions.fetch_add(1, Ordering::Relaxed);
    }

    /// Watches left open (state of the world).
    #[inline]
    pub fn watches_opened(&self) -> u64 {
        self.watches_opened.load(Ordering::Relaxed)
    }

    /// Delta watches left open.
    #[inline]
    pub fn delta_watches_opened(&self) -> u64 {
        self.delta_watches_opened.load(Ordering::Relaxed)
    }

    /// State of the world responses delivered.
    #[inline]
    pub fn responses_sent(&self) -> u64 {
        self.responses_sent.load(Ordering::Relaxed)
    }

    /// Delta responses delivered.
    #[inline]
    pub fn delta_responses_sent(&self) -> u64 {
        self.delta_responses_sent.load(Ordering::Relaxed)
    }

    /// Update batches applied.
    #[inline]
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied.load(Ordering::Relaxed)
    }

    /// Fetches answered with resources.
    #[inline]
    pub fn fetch_hits(&self) -> u64 {
        self.fetch_hits.load(Ordering::Relaxed)
    }

    /// Fetches skipped because the requester was current.
    #[inline]
    pub fn fetch_skips(&self) -> u64 {
        self.fetch_skips.load(Ordering::Relaxed)
    }

    /// Fetches against a missing container.
    #[inline]
    pub fn fetch_misses(&self) -> u64 {
        self.fetch_misses.load(Ordering::Relaxed)
    }

    /// Responses held back by the aggregated discovery name check.
    #[inline]
    pub fn ads_suppressions(&self) -> u64 {
        self.ads_suppressions.load(Ordering::Relaxed)
    }

    /// Share of fetches that returned resources (0.0 to 1.0).
    pub fn fetch_hit_rate(&self) -> f64 {
        let hits = self.fetch_hits() as f64;
        let total = hits + self.fetch_skips() as f64 + self.fetch_misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        for counter in [
            &self.watches_opened,
            &self.delta_watches_opened,
            &self.responses_sent,
            &self.delta_responses_sent,
            &self.updates_applied,
            &self.fetch_hits,
            &self.fetch_skips,
            &self.fetch_misses,
            &self.ads_suppressions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
