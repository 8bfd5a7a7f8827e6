//! tiercache - Tiered In-Memory Cache
//!
//! An application-level cache that keeps values in ordered tiers (hot, warm,
//! cold by default), each bounded by bytes and item count. Reads promote,
//! evictions demote, and access patterns drive speculative prefetch.
//!
//! # Architecture
//!
//! ```text
//! get ──▶ hot ──▶ warm ──▶ cold ──▶ loader
//!          ▲        │        │
//!          └────────┴────────┘  promote on hit
//! set ──▶ hot ──evict──▶ warm ──evict──▶ cold ──evict──▶ dropped
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, eviction, events, prediction and the [`SmartCache`] façade
//! - [`monitoring`] - Prometheus exposition of cache statistics
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```ignore
//! let cache: SmartCache<User> = SmartCache::with_defaults();
//! cache.start();
//!
//! let user = cache
//!     .get_or_load("user:42", || async { db.load_user(42).await })
//!     .await?;
//! cache.invalidate_by_tag("session");
//! ```

pub mod cache;
pub mod error;
pub mod monitoring;

// Re-export commonly used types
pub use cache::{
    with_cache, CacheConfig, CacheEvent, CacheStats, KeyPattern, MemoryPressureLevel,
    PrefetchSource, SetOptions, SmartCache, Subscription, TierConfig,
};
pub use error::{Error, Result};
pub use monitoring::PrometheusExporter;
