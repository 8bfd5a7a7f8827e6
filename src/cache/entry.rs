//! Cache Entry Types
//!
//! Per-key metadata shared by every tier: timestamps, hit count, estimated
//! size, priority, TTL and tags.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::policy::EvictionPolicy;

/// Options accepted by `set`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Time to live measured from insertion
    pub ttl: Option<Duration>,
    /// Eviction resistance (higher survives longer)
    pub priority: f64,
    /// Tags for bulk invalidation
    pub tags: Vec<String>,
}

impl SetOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Cache entry containing a value and its metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
    hit_count: u64,
    size_bytes: u64,
    priority: f64,
    ttl: Option<Duration>,
    tags: HashSet<String>,
    prefetched: bool,
}

impl<V> CacheEntry<V> {
    /// Create a new entry stamped with `now`
    pub fn new(value: V, size_bytes: u64, options: SetOptions, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            last_access: now,
            hit_count: 0,
            size_bytes,
            priority: options.priority,
            ttl: options.ttl,
            tags: options.tags.into_iter().collect(),
            prefetched: false,
        }
    }

    /// Mark the entry as loaded ahead of demand
    pub(crate) fn mark_prefetched(mut self) -> Self {
        self.prefetched = true;
        self
    }

    /// Get the value
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Estimated size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size_bytes
    }

    /// Number of hits since insertion
    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Caller-assigned priority
    #[inline]
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// TTL if any
    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Insertion time
    #[inline]
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// Last access time
    #[inline]
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Tags attached at insertion
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Check tag membership
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// True while the entry was prefetched and not yet read
    pub fn is_prefetched(&self) -> bool {
        self.prefetched
    }

    /// Time since insertion
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    /// Time since last access
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }

    /// Expired when strictly more than `ttl` has passed since insertion
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => self.age(now) > ttl,
            None => false,
        }
    }

    /// Record a hit. Returns true if this was the first read of a prefetched entry.
    pub fn record_hit(&mut self, now: Instant) -> bool {
        self.last_access = now;
        self.hit_count += 1;
        std::mem::replace(&mut self.prefetched, false)
    }

    /// Eviction score under `policy` (lower = evicted first)
    pub fn eviction_score(&self, now: Instant, policy: &EvictionPolicy) -> f64 {
        policy.score(self.hit_count, self.priority, self.idle(now), self.age(now))
    }
}

/// Estimate the in-memory footprint of a value as two bytes per character of
/// its JSON form. Returns `None` when the value cannot be serialized.
pub fn estimate_size<V: Serialize + ?Sized>(value: &V) -> Option<u64> {
    serde_json::to_string(value)
        .ok()
        .map(|json| json.chars().count() as u64 * 2)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_set_options_builder() {
        let options = SetOptions::new()
            .ttl(Duration::from_secs(5))
            .priority(2.0)
            .tag("user")
            .tags(["session", "profile"]);

        assert_eq!(options.ttl, Some(Duration::from_secs(5)));
        assert_eq!(options.priority, 2.0);
        assert_eq!(options.tags, vec!["user", "session", "profile"]);
    }

    #[test]
    fn test_entry_creation() {
        let now = Instant::now();
        let entry = CacheEntry::new("v", 10, SetOptions::new().tag("a"), now);

        assert_eq!(*entry.value(), "v");
        assert_eq!(entry.size(), 10);
        assert_eq!(entry.hit_count(), 0);
        assert_eq!(entry.inserted_at(), now);
        assert!(entry.has_tag("a"));
        assert!(!entry.has_tag("b"));
        assert!(!entry.is_prefetched());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_ttl_boundary() {
        let start = Instant::now();
        let entry = CacheEntry::new(1u32, 8, SetOptions::new().ttl(Duration::from_millis(100)), start);

        assert!(!entry.is_expired(start + Duration::from_millis(50)));
        assert!(!entry.is_expired(start + Duration::from_millis(100)));
        assert!(entry.is_expired(start + Duration::from_millis(101)));
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new((), 0, SetOptions::new(), now);
        assert!(!entry.is_expired(now + Duration::from_secs(86_400)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_hit_updates_metadata() {
        let start = Instant::now();
        let mut entry = CacheEntry::new(1u8, 2, SetOptions::new(), start).mark_prefetched();
        assert!(entry.is_prefetched());

        let later = start + Duration::from_millis(30);
        assert!(entry.record_hit(later));
        assert!(!entry.record_hit(later));

        assert_eq!(entry.hit_count(), 2);
        assert_eq!(entry.last_access(), later);
        assert_eq!(entry.idle(later), Duration::ZERO);
        assert_eq!(entry.age(later), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_score_follows_policy() {
        let policy = EvictionPolicy::balanced();
        let start = Instant::now();
        let low = CacheEntry::new(0u8, 1, SetOptions::new(), start);
        let high = CacheEntry::new(0u8, 1, SetOptions::new().priority(1.0), start);

        let now = start + Duration::from_millis(100);
        assert!(low.eviction_score(now, &policy) < high.eviction_score(now, &policy));
        // (0 * 1000 + 1 * 10000) / (100 + 100)
        assert_eq!(high.eviction_score(now, &policy), 50.0);
    }

    #[test]
    fn test_estimate_size_json_chars() {
        // "\"abc\"" is 5 characters
        assert_eq!(estimate_size("abc"), Some(10));
        assert_eq!(estimate_size(&42u32), Some(4));

        let mut map = HashMap::new();
        map.insert("name", "A");
        // {"name":"A"} is 12 characters
        assert_eq!(estimate_size(&map), Some(24));
    }

    #[test]
    fn test_estimate_size_unserializable() {
        // JSON object keys must be strings
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1u8);
        assert_eq!(estimate_size(&map), None);
    }
}
