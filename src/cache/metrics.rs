//! Cache Metrics Collection
//!
//! Statistics for monitoring cache health: per-tier counters, logical
//! hit/miss counts for `get` calls, and prefetch accuracy.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::Result;

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Statistics for one tier (or the aggregate)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size_bytes: u64,
    pub items: u64,
    /// hits / (hits + misses), 0 with no accesses
    pub hit_rate: f64,
}

impl TierStats {
    /// Build stats, deriving the hit rate
    pub fn new(hits: u64, misses: u64, evictions: u64, expirations: u64, size_bytes: u64, items: u64) -> Self {
        Self {
            hits,
            misses,
            evictions,
            expirations,
            size_bytes,
            items,
            hit_rate: ratio(hits, hits + misses),
        }
    }
}

/// Prefetch effectiveness
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionStats {
    /// Prefetches queued
    pub scheduled: u64,
    /// Prefetches that stored a value
    pub completed: u64,
    /// Prefetches whose source failed
    pub failed: u64,
    /// Prefetched entries that were later read
    pub useful: u64,
    /// useful / completed
    pub accuracy: f64,
}

/// Snapshot of every cache statistic
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Logical hits/misses of `get` calls; sizes, items and evictions summed over tiers
    pub overall: TierStats,
    /// Per-tier statistics, hottest first
    pub layers: Vec<(String, TierStats)>,
    pub predictions: PredictionStats,
    /// Entries moved to a hotter tier on a hit
    pub promotions: u64,
    /// Entries cascaded to a colder tier on eviction
    pub demotions: u64,
    /// Values whose size fell back to the default estimate
    pub serialization_fallbacks: u64,
}

impl CacheStats {
    /// Stats for a named tier
    pub fn layer(&self, name: &str) -> Option<&TierStats> {
        self.layers.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Lock-free counters kept outside the tier lock
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    prefetch_scheduled: AtomicU64,
    prefetch_completed: AtomicU64,
    prefetch_failed: AtomicU64,
    prefetch_useful: AtomicU64,
    serialization_fallbacks: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_scheduled(&self) {
        self.prefetch_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_completed(&self) {
        self.prefetch_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_failed(&self) {
        self.prefetch_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_useful(&self) {
        self.prefetch_useful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serialization_fallback(&self) {
        self.serialization_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn demotions(&self) -> u64 {
        self.demotions.load(Ordering::Relaxed)
    }

    pub fn serialization_fallbacks(&self) -> u64 {
        self.serialization_fallbacks.load(Ordering::Relaxed)
    }

    /// Get overall hit ratio of `get` calls
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        ratio(hits, hits + self.misses())
    }

    /// Prefetch statistics snapshot
    pub fn predictions(&self) -> PredictionStats {
        let completed = self.prefetch_completed.load(Ordering::Relaxed);
        let useful = self.prefetch_useful.load(Ordering::Relaxed);
        PredictionStats {
            scheduled: self.prefetch_scheduled.load(Ordering::Relaxed),
            completed,
            failed: self.prefetch_failed.load(Ordering::Relaxed),
            useful,
            accuracy: ratio(useful, completed),
        }
    }

    /// Combine tier stats with the logical counters
    pub fn snapshot(&self, layers: Vec<(String, TierStats)>) -> CacheStats {
        let (evictions, expirations, size_bytes, items) =
            layers.iter().fold((0, 0, 0, 0), |acc, (_, s)| {
                (
                    acc.0 + s.evictions,
                    acc.1 + s.expirations,
                    acc.2 + s.size_bytes,
                    acc.3 + s.items,
                )
            });

        CacheStats {
            overall: TierStats::new(self.hits(), self.misses(), evictions, expirations, size_bytes, items),
            layers,
            predictions: self.predictions(),
            promotions: self.promotions(),
            demotions: self.demotions(),
            serialization_fallbacks: self.serialization_fallbacks(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
