//! Bounded Cache - a single tier
//!
//! Byte- and item-capped map with lazy TTL expiration and scored LRU eviction.
//!
//! # Design
//!
//! - `HashMap` index plus a `BTreeMap<seq, key>` recency order (MRU at the tail)
//! - Eviction scores only the first `scan_window` keys of the recency order
//! - Expired candidates are always evicted before live ones
//! - Not internally synchronized; the tier manager owns the lock

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use super::config::TierConfig;
use super::entry::CacheEntry;
use super::metrics::TierStats;
use super::policy::EvictionPolicy;
use crate::error::{Error, Result};

/// Why an entry left a tier without being asked to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Made room for a new entry
    Capacity,
    /// TTL elapsed
    Expired,
}

/// An entry pushed out of a tier during `insert`
#[derive(Debug)]
pub struct Evicted<V> {
    pub key: String,
    pub entry: CacheEntry<V>,
    pub reason: EvictionReason,
}

/// Result of a successful lookup
#[derive(Debug)]
pub struct Hit<'a, V> {
    /// The entry after its hit was recorded
    pub entry: &'a CacheEntry<V>,
    /// First read of an entry that was inserted by the prefetcher
    pub was_prefetched: bool,
}

#[derive(Debug)]
struct Slot<V> {
    entry: CacheEntry<V>,
    seq: u64,
}

/// A single bounded cache tier
#[derive(Debug)]
pub struct BoundedCache<V> {
    name: String,
    max_bytes: u64,
    max_items: usize,
    default_ttl: Option<Duration>,
    policy: EvictionPolicy,
    entries: HashMap<String, Slot<V>>,
    /// Recency order, least recently used first
    order: BTreeMap<u64, String>,
    next_seq: u64,
    current_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> BoundedCache<V> {
    /// Create a tier with explicit limits
    pub fn new(name: impl Into<String>, max_bytes: u64, max_items: usize, policy: EvictionPolicy) -> Self {
        Self {
            name: name.into(),
            max_bytes,
            max_items,
            default_ttl: None,
            policy,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            current_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Create a tier from its config
    pub fn with_config(config: &TierConfig, policy: EvictionPolicy) -> Self {
        let mut cache = Self::new(config.name.clone(), config.max_bytes, config.max_items, policy);
        cache.default_ttl = config.default_ttl;
        cache
    }

    /// Look up a key, recording the hit or miss
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<Hit<'_, V>> {
        let expired = match self.entries.get(key) {
            Some(slot) => slot.entry.is_expired(now),
            None => {
                self.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove(key);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }

        let seq = self.bump_seq();
        let slot = self.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.seq, seq);
        self.order.remove(&previous);
        self.order.insert(seq, key.to_string());

        let was_prefetched = slot.entry.record_hit(now);
        self.hits += 1;

        Some(Hit {
            entry: &slot.entry,
            was_prefetched,
        })
    }

    /// Read an entry without touching recency or statistics
    pub fn peek(&self, key: &str, now: Instant) -> Option<&CacheEntry<V>> {
        self.entries
            .get(key)
            .map(|slot| &slot.entry)
            .filter(|entry| !entry.is_expired(now))
    }

    /// Check if a live (unexpired) entry exists
    pub fn contains(&self, key: &str, now: Instant) -> bool {
        self.peek(key, now).is_some()
    }

    /// Insert or overwrite an entry, evicting as needed
    ///
    /// Fails without mutating anything if the entry alone exceeds the byte
    /// budget. Returns the entries evicted to make room.
    pub fn insert(&mut self, key: String, entry: CacheEntry<V>, now: Instant) -> Result<Vec<Evicted<V>>> {
        let size = entry.size();
        if size > self.max_bytes {
            return Err(Error::Capacity {
                key,
                size,
                capacity: self.max_bytes,
            });
        }

        // Overwrite replaces in place; the old entry is not an eviction
        self.remove(&key);

        let mut evicted = Vec::new();
        while (self.current_bytes + size > self.max_bytes || self.entries.len() >= self.max_items)
            && !self.entries.is_empty()
        {
            let Some((victim, reason)) = self.pick_victim(now) else {
                break;
            };
            if let Some(entry) = self.remove(&victim) {
                match reason {
                    EvictionReason::Capacity => self.evictions += 1,
                    EvictionReason::Expired => self.expirations += 1,
                }
                evicted.push(Evicted {
                    key: victim,
                    entry,
                    reason,
                });
            }
        }

        let seq = self.bump_seq();
        self.order.insert(seq, key.clone());
        self.current_bytes += size;
        self.entries.insert(key, Slot { entry, seq });

        Ok(evicted)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        self.current_bytes -= slot.entry.size();
        Some(slot.entry)
    }

    /// Remove every entry matching `predicate`, returning the removed keys
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&str, &CacheEntry<V>) -> bool,
    {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, slot)| predicate(key, &slot.entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let removed = self.remove_where(|_, entry| entry.is_expired(now)).len();
        self.expirations += removed as u64;
        removed
    }

    /// Keys idle for at least `idle`, least recently used first
    pub fn idle_keys(&self, now: Instant, idle: Duration) -> Vec<String> {
        self.order
            .values()
            .filter(|key| {
                self.entries
                    .get(key.as_str())
                    .is_some_and(|slot| slot.entry.idle(now) >= idle)
            })
            .cloned()
            .collect()
    }

    /// All keys, least recently used first
    pub fn keys(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    /// Drop all entries, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.current_bytes = 0;
        count
    }

    /// Choose the next victim among the LRU-end candidates
    fn pick_victim(&self, now: Instant) -> Option<(String, EvictionReason)> {
        let mut best: Option<(&String, f64)> = None;

        for key in self.order.values().take(self.policy.scan_window.max(1)) {
            let Some(slot) = self.entries.get(key) else {
                continue;
            };
            if slot.entry.is_expired(now) {
                return Some((key.clone(), EvictionReason::Expired));
            }
            let score = slot.entry.eviction_score(now, &self.policy);
            // Strict comparison keeps the least recently used on ties
            if best.map_or(true, |(_, min)| score < min) {
                best = Some((key, score));
            }
        }

        best.map(|(key, _)| (key.clone(), EvictionReason::Capacity))
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Tier name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// TTL applied to entries stored here without one
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.current_bytes
    }

    /// Byte capacity
    pub fn capacity(&self) -> u64 {
        self.max_bytes
    }

    /// Item capacity
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Number of entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get tier statistics
    pub fn stats(&self) -> TierStats {
        TierStats::new(
            self.hits,
            self.misses,
            self.evictions,
            self.expirations,
            self.current_bytes,
            self.entries.len() as u64,
        )
    }

    /// Verify byte accounting and index/order agreement
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let total: u64 = self.entries.values().map(|slot| slot.entry.size()).sum();
        if total != self.current_bytes {
            return Err(format!(
                "tier '{}': current_bytes {} != sum of entries {}",
                self.name, self.current_bytes, total
            ));
        }
        if self.order.len() != self.entries.len() {
            return Err(format!(
                "tier '{}': order has {} keys, index has {}",
                self.name,
                self.order.len(),
                self.entries.len()
            ));
        }
        for (seq, key) in &self.order {
            match self.entries.get(key) {
                Some(slot) if slot.seq == *seq => {}
                _ => return Err(format!("tier '{}': stale order entry '{}'", self.name, key)),
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::SetOptions;
    use assert_matches::assert_matches;
    use tokio::time::advance;

    fn make_entry(size: u64, options: SetOptions) -> CacheEntry<String> {
        CacheEntry::new(format!("value-{}", size), size, options, Instant::now())
    }

    fn make_cache(max_bytes: u64, max_items: usize) -> BoundedCache<String> {
        BoundedCache::new("test", max_bytes, max_items, EvictionPolicy::default())
    }

    #[test]
    fn test_bounded_cache_creation() {
        let cache = make_cache(1000, 10);
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.capacity(), 1000);
        assert_eq!(cache.max_items(), 10);
        assert_eq!(cache.name(), "test");
    }

    #[test]
    fn test_from_tier_config() {
        let config = TierConfig::new("warm", 4096, 8).with_default_ttl(Duration::from_secs(9));
        let cache: BoundedCache<u8> = BoundedCache::with_config(&config, EvictionPolicy::lru());
        assert_eq!(cache.name(), "warm");
        assert_eq!(cache.capacity(), 4096);
        assert_eq!(cache.default_ttl(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_insert_get() {
        let mut cache = make_cache(1000, 10);
        let now = Instant::now();

        let evicted = cache.insert("a".into(), make_entry(13, SetOptions::new()), now).unwrap();
        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 13);

        let hit = cache.get("a", now).unwrap();
        assert_eq!(hit.entry.value(), "value-13");
        assert_eq!(hit.entry.hit_count(), 1);
        assert!(!hit.was_prefetched);
    }

    #[test]
    fn test_miss_tracking() {
        let mut cache = make_cache(1000, 10);
        assert!(cache.get("missing", Instant::now()).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_overwrite_updates_size() {
        let mut cache = make_cache(1000, 10);
        let now = Instant::now();

        cache.insert("k".into(), make_entry(8, SetOptions::new()), now).unwrap();
        assert_eq!(cache.size(), 8);

        let evicted = cache.insert("k".into(), make_entry(16, SetOptions::new()), now).unwrap();
        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 16);
        assert_eq!(cache.stats().evictions, 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_overwrite_at_item_capacity_does_not_evict() {
        let mut cache = make_cache(1000, 2);
        let now = Instant::now();
        cache.insert("a".into(), make_entry(1, SetOptions::new()), now).unwrap();
        cache.insert("b".into(), make_entry(1, SetOptions::new()), now).unwrap();

        let evicted = cache.insert("a".into(), make_entry(2, SetOptions::new()), now).unwrap();
        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut cache = make_cache(1000, 10);
        let now = Instant::now();
        cache.insert("k".into(), make_entry(4, SetOptions::new()), now).unwrap();

        assert!(cache.remove("k").is_some());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);
        assert!(cache.remove("k").is_none());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_clear() {
        let mut cache = make_cache(100_000, 1000);
        let now = Instant::now();
        for i in 0..100 {
            cache
                .insert(format!("object-{}", i), make_entry(100, SetOptions::new()), now)
                .unwrap();
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.size(), 10_000);

        assert_eq!(cache.clear(), 100);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_oversized_entry_rejected_without_mutation() {
        let mut cache = make_cache(100, 10);
        let now = Instant::now();
        cache.insert("small".into(), make_entry(60, SetOptions::new()), now).unwrap();

        let result = cache.insert("huge".into(), make_entry(101, SetOptions::new()), now);
        assert_matches!(result, Err(Error::Capacity { size: 101, capacity: 100, .. }));
        assert!(cache.contains("small", now));
        assert_eq!(cache.size(), 60);
    }

    #[test]
    fn test_byte_budget_eviction() {
        let mut cache = make_cache(1000, 100);
        let now = Instant::now();
        for i in 0..20 {
            cache
                .insert(format!("object-{}", i), make_entry(100, SetOptions::new()), now)
                .unwrap();
        }

        assert!(cache.size() <= 1000);
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.stats().evictions, 10);
        cache.check_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_budget_evicts_lowest_score() {
        let mut cache = make_cache(10_000, 3);

        cache.insert("a".into(), make_entry(10, SetOptions::new().priority(5.0)), Instant::now()).unwrap();
        cache.insert("b".into(), make_entry(10, SetOptions::new()), Instant::now()).unwrap();
        cache.insert("c".into(), make_entry(10, SetOptions::new().priority(1.0)), Instant::now()).unwrap();
        advance(Duration::from_millis(10)).await;

        let evicted = cache.insert("d".into(), make_entry(10, SetOptions::new()), Instant::now()).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "b");
        assert_eq!(evicted[0].reason, EvictionReason::Capacity);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_protect_from_eviction() {
        let mut cache = make_cache(10_000, 2);

        cache.insert("old".into(), make_entry(10, SetOptions::new()), Instant::now()).unwrap();
        cache.insert("new".into(), make_entry(10, SetOptions::new()), Instant::now()).unwrap();
        advance(Duration::from_millis(5)).await;
        for _ in 0..3 {
            cache.get("old", Instant::now());
        }
        advance(Duration::from_millis(5)).await;

        let evicted = cache.insert("x".into(), make_entry(10, SetOptions::new()), Instant::now()).unwrap();
        assert_eq!(evicted[0].key, "new");
        assert!(cache.contains("old", Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tie_evicts_least_recently_used() {
        let mut cache = BoundedCache::new("lru", 10_000, 2, EvictionPolicy::lru());
        cache.insert("first".into(), make_entry(1, SetOptions::new()), Instant::now()).unwrap();
        cache.insert("second".into(), make_entry(1, SetOptions::new()), Instant::now()).unwrap();
        cache.get("first", Instant::now());

        let evicted = cache.insert("third".into(), make_entry(1, SetOptions::new()), Instant::now()).unwrap();
        assert_eq!(evicted[0].key, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_lazy_expiration() {
        let mut cache = make_cache(1000, 10);
        let options = SetOptions::new().ttl(Duration::from_millis(100));
        cache.insert("k".into(), make_entry(10, options), Instant::now()).unwrap();

        advance(Duration::from_millis(50)).await;
        assert!(cache.get("k", Instant::now()).is_some());

        advance(Duration::from_millis(100)).await;
        assert!(cache.get("k", Instant::now()).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        cache.check_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_first() {
        let mut cache = make_cache(10_000, 2);
        cache
            .insert("pinned".into(), make_entry(1, SetOptions::new().priority(0.0)), Instant::now())
            .unwrap();
        cache
            .insert(
                "short".into(),
                make_entry(1, SetOptions::new().priority(100.0).ttl(Duration::from_millis(10))),
                Instant::now(),
            )
            .unwrap();
        advance(Duration::from_millis(20)).await;

        let evicted = cache.insert("new".into(), make_entry(1, SetOptions::new()), Instant::now()).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "short");
        assert_eq!(evicted[0].reason, EvictionReason::Expired);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let mut cache = make_cache(1000, 10);
        let ttl = SetOptions::new().ttl(Duration::from_millis(10));
        cache.insert("a".into(), make_entry(5, ttl.clone()), Instant::now()).unwrap();
        cache.insert("b".into(), make_entry(5, ttl), Instant::now()).unwrap();
        cache.insert("c".into(), make_entry(5, SetOptions::new()), Instant::now()).unwrap();
        advance(Duration::from_millis(11)).await;

        assert_eq!(cache.purge_expired(Instant::now()), 2);
        assert_eq!(cache.keys(), vec!["c".to_string()]);
        assert_eq!(cache.size(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_keys() {
        let mut cache = make_cache(1000, 10);
        cache.insert("idle".into(), make_entry(1, SetOptions::new()), Instant::now()).unwrap();
        cache.insert("busy".into(), make_entry(1, SetOptions::new()), Instant::now()).unwrap();
        advance(Duration::from_secs(10)).await;
        cache.get("busy", Instant::now());

        let idle = cache.idle_keys(Instant::now(), Duration::from_secs(5));
        assert_eq!(idle, vec!["idle".to_string()]);
    }

    #[test]
    fn test_remove_where_and_recency_order() {
        let mut cache = make_cache(1000, 10);
        let now = Instant::now();
        cache.insert("user:1".into(), make_entry(1, SetOptions::new().tag("u")), now).unwrap();
        cache.insert("post:1".into(), make_entry(1, SetOptions::new()), now).unwrap();
        cache.insert("user:2".into(), make_entry(1, SetOptions::new().tag("u")), now).unwrap();
        cache.get("user:1", now);

        assert_eq!(cache.keys(), vec!["post:1", "user:2", "user:1"]);

        let mut removed = cache.remove_where(|_, entry| entry.has_tag("u"));
        removed.sort();
        assert_eq!(removed, vec!["user:1", "user:2"]);
        assert_eq!(cache.keys(), vec!["post:1"]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_peek_does_not_record() {
        let mut cache = make_cache(1000, 10);
        let now = Instant::now();
        cache.insert("k".into(), make_entry(1, SetOptions::new()), now).unwrap();

        assert!(cache.peek("k", now).is_some());
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.peek("k", now).unwrap().hit_count(), 0);
    }
}
