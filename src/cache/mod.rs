//! Tiered In-Memory Cache
//!
//! Ordered tiers of bounded caches with promotion on read, cascade demotion on
//! eviction, tag and pattern invalidation, and predictive prefetch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           SmartCache                                      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  hot (1 MB / 100)    │ warm (5 MB / 500)    │ cold (20 MB / 2000)        │
//! │  ┌────────────────┐  │ ┌────────────────┐   │ ┌────────────────────┐     │
//! │  │ BoundedCache   │──┼▶│ BoundedCache   │───┼▶│ BoundedCache       │──▶ ✗│
//! │  └────────────────┘  │ └────────────────┘   │ └────────────────────┘     │
//! │          ▲           │         │            │           │                │
//! │          └───────────┴─────────┴────────────┴───────────┘                │
//! │                     promote on hit / demote on evict                      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  AccessPatternTracker ──▶ Prefetcher ──▶ PrefetchSource                   │
//! │  EventBus (cache:* events, key subscriptions)   CacheMetrics             │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Eviction
//!
//! Victims come from the least recently used end of a tier. Among the first
//! `scan_window` candidates an expired entry goes first; otherwise the lowest
//! `(hits * frequency_weight + priority * priority_weight) / (recency + age)`
//! score loses, ties broken toward least recently used.
//!
//! # Concurrency
//!
//! One lock guards all tiers and is never held across an `.await`. Listeners
//! are invoked after the lock is released.

mod bounded;
mod config;
mod entry;
mod events;
mod manager;
mod memoize;
mod metrics;
mod pattern;
mod policy;
mod prefetch;

pub use bounded::{BoundedCache, Evicted, EvictionReason, Hit};
pub use config::{CacheConfig, PredictionConfig, PredictionUpdate, TierConfig};
pub use entry::{estimate_size, CacheEntry, SetOptions};
pub use events::{CacheEvent, EventBus, EventRecorder, Subscription};
pub use manager::{CacheValue, KeyPattern, OptimizeReport, SmartCache};
pub use memoize::with_cache;
pub use metrics::{CacheMetrics, CacheStats, PredictionStats, TierStats};
pub use pattern::AccessPatternTracker;
pub use policy::{EvictionPolicy, MemoryPressureLevel};
pub use prefetch::{FnSource, InMemorySource, PrefetchSource, Prefetcher};

/// Size assumed for values that cannot be serialized
pub const DEFAULT_ENTRY_SIZE: u64 = 1024;

/// Access timestamps retained per key
pub const DEFAULT_HISTORY_LEN: usize = 10;

/// Predicted keys prefetched per access
pub const DEFAULT_LOOK_AHEAD: usize = 3;
