//! Cache Manager - Unified Tiered Cache
//!
//! Orchestrates the hot → cold tier sequence: lookups scan hottest first and
//! promote colder hits, writes land in the hot tier, and capacity evictions
//! cascade one tier down (demotion) until the coldest tier drops them.
//!
//! All tier state sits behind one lock that is never held across an `.await`,
//! so a key is in at most one tier at any observation point.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Serialize, Serializer};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::bounded::{BoundedCache, Evicted, EvictionReason};
use super::config::{CacheConfig, PredictionConfig, PredictionUpdate};
use super::entry::{estimate_size, CacheEntry, SetOptions};
use super::events::{CacheEvent, EventBus, Subscription};
use super::metrics::{CacheMetrics, CacheStats, TierStats};
use super::pattern::AccessPatternTracker;
use super::policy::MemoryPressureLevel;
use super::prefetch::{PrefetchSource, Prefetcher};
use crate::error::{Error, Result};

/// Bounds required of cached values
pub trait CacheValue: Clone + Serialize + Send + Sync + 'static {}

impl<T: Clone + Serialize + Send + Sync + 'static> CacheValue for T {}

/// Key selector for `invalidate` and `subscribe`
///
/// Strings are compiled as regular expressions.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Regex(Regex),
    Source(String),
}

impl KeyPattern {
    /// Compile into a regex
    pub fn regex(&self) -> Result<Cow<'_, Regex>> {
        match self {
            KeyPattern::Regex(re) => Ok(Cow::Borrowed(re)),
            KeyPattern::Source(src) => Ok(Cow::Owned(Regex::new(src)?)),
        }
    }

    /// Pattern text as reported in events
    pub fn as_str(&self) -> &str {
        match self {
            KeyPattern::Regex(re) => re.as_str(),
            KeyPattern::Source(src) => src,
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(src: &str) -> Self {
        KeyPattern::Source(src.to_string())
    }
}

impl From<String> for KeyPattern {
    fn from(src: String) -> Self {
        KeyPattern::Source(src)
    }
}

impl From<Regex> for KeyPattern {
    fn from(re: Regex) -> Self {
        KeyPattern::Regex(re)
    }
}

impl From<&Regex> for KeyPattern {
    fn from(re: &Regex) -> Self {
        KeyPattern::Regex(re.clone())
    }
}

/// Outcome of an optimization pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizeReport {
    /// Expired entries swept from all tiers
    pub expired_removed: usize,
    /// Idle hot entries moved down one tier
    pub demoted: usize,
    /// Overall hit rate when the pass ran
    #[serde(serialize_with = "round_rate")]
    pub hit_rate: f64,
}

fn round_rate<S: Serializer>(rate: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64((rate * 1000.0).round() / 1000.0)
}

struct Inner<V> {
    tiers: Mutex<Vec<BoundedCache<V>>>,
    config: CacheConfig,
    prediction: RwLock<PredictionConfig>,
    tracker: AccessPatternTracker,
    prefetcher: Prefetcher<V>,
    events: EventBus<V>,
    metrics: CacheMetrics,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    shutdown: CancellationToken,
    optimizer: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Tiered cache with promotion, cascade demotion and predictive prefetch
///
/// Cloning is cheap and yields another handle to the same cache.
pub struct SmartCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SmartCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> std::fmt::Debug for SmartCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<String> = self.inner.config.tiers.iter().map(|t| t.name.clone()).collect();
        f.debug_struct("SmartCache").field("tiers", &tiers).finish()
    }
}

/// Removes the in-flight gate for a key once no caller holds it
struct InflightGate<'a, V> {
    inner: &'a Inner<V>,
    key: &'a str,
    gate: Arc<AsyncMutex<()>>,
}

impl<'a, V> InflightGate<'a, V> {
    fn acquire(inner: &'a Inner<V>, key: &'a str) -> Self {
        let gate = inner
            .inflight
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Self { inner, key, gate }
    }
}

impl<V> Drop for InflightGate<'_, V> {
    fn drop(&mut self) {
        let mut inflight = self.inner.inflight.lock();
        // Map + this handle; anyone still waiting holds another clone
        if Arc::strong_count(&self.gate) == 2 {
            inflight.remove(self.key);
        }
    }
}

impl<V: CacheValue> SmartCache<V> {
    /// Create a cache from a validated config
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a cache with the default hot/warm/cold layout
    pub fn with_defaults() -> Self {
        Self::build(CacheConfig::default())
    }

    fn build(config: CacheConfig) -> Self {
        let tiers = config
            .tiers
            .iter()
            .map(|tier| BoundedCache::with_config(tier, config.eviction.clone()))
            .collect();

        info!(
            tiers = ?config.tiers.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Creating tiered cache"
        );

        Self {
            inner: Arc::new(Inner {
                tiers: Mutex::new(tiers),
                tracker: AccessPatternTracker::with_config(&config.prediction),
                prediction: RwLock::new(config.prediction.clone()),
                prefetcher: Prefetcher::new(),
                events: EventBus::new(),
                metrics: CacheMetrics::new(),
                inflight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                optimizer: Mutex::new(None),
                config,
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the periodic optimization task
    ///
    /// Returns false when disabled by config, already running, or called
    /// outside a tokio runtime.
    pub fn start(&self) -> bool {
        let Some(period) = self.inner.config.optimize_interval else {
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, background optimization disabled");
            return false;
        };

        let mut slot = self.inner.optimizer.lock();
        if slot.is_some() || self.inner.shutdown.is_cancelled() {
            return false;
        }

        let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        *slot = Some(runtime.spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let report = SmartCache { inner }.optimize();
                        debug!(?report, "Periodic optimization");
                    }
                }
            }
            debug!("Optimization task stopped");
        }));

        info!(interval_ms = period.as_millis() as u64, "Started background optimization");
        true
    }

    /// Stop background work, drop all entries and detach every listener
    pub fn destroy(&self) {
        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.optimizer.lock().take() {
            handle.abort();
        }

        for tier in self.inner.tiers.lock().iter_mut() {
            tier.clear();
        }
        self.inner.events.clear();
        self.inner.tracker.clear();
        self.inner.prefetcher.clear();
        info!("Cache destroyed");
    }

    /// True once `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value, scanning tiers hottest to coldest
    ///
    /// A hit in a colder tier moves the entry to the hot tier.
    pub async fn get(&self, key: &str) -> Option<V> {
        match self.lookup(key) {
            Some(value) => Some(value),
            None => {
                self.record_miss(key);
                None
            }
        }
    }

    /// Get a value, loading and caching it on a miss
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.get_or_load_with(key, SetOptions::default(), loader).await
    }

    /// Get a value, loading it with `loader` and storing it with `options` on a miss
    ///
    /// Concurrent misses for the same key share one load: later callers wait
    /// for the first and then read the cached result. Loader errors are
    /// returned unchanged and nothing is cached. A loaded value that cannot be
    /// cached is still returned.
    #[instrument(skip(self, options, loader))]
    pub async fn get_or_load_with<F, Fut, E>(
        &self,
        key: &str,
        options: SetOptions,
        loader: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let gate = InflightGate::acquire(&self.inner, key);
        let _held = gate.gate.lock().await;

        if let Some(value) = self.lookup(key) {
            debug!(key, "Served by concurrent load");
            return Ok(value);
        }

        self.record_miss(key);
        let value = loader().await?;

        match self.store(key, value.clone(), options, false) {
            Ok(()) => {}
            Err(Error::Destroyed) => return Ok(value),
            Err(err) => warn!(key, error = %err, "Loaded value not cached"),
        }
        self.inner.tracker.record(key, Instant::now());
        self.inner.prefetcher.on_access(self, key);

        Ok(value)
    }

    /// Get several values
    pub async fn mget<I, S>(&self, keys: I) -> Vec<(String, Option<V>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut results = Vec::new();
        for key in keys {
            let key = key.into();
            let value = self.get(&key).await;
            results.push((key, value));
        }
        results
    }

    /// Look up without loading; records hits only
    fn lookup(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut events = Vec::new();

        let (value, tier, was_prefetched) = {
            let mut tiers = self.inner.tiers.lock();

            let mut found = None;
            for idx in 0..tiers.len() {
                if let Some(hit) = tiers[idx].get(key, now) {
                    found = Some((idx, hit.entry.value().clone(), hit.was_prefetched));
                    break;
                }
            }
            let (idx, value, was_prefetched) = found?;
            let tier = tiers[idx].name().to_string();

            if idx > 0 {
                self.promote(&mut tiers, idx, key, now, &mut events);
            }
            (value, tier, was_prefetched)
        };

        self.inner.metrics.record_hit();
        if was_prefetched {
            self.inner.metrics.record_prefetch_useful();
        }
        self.inner.tracker.record(key, now);

        events.push(CacheEvent::hit(key, &tier));
        self.inner.events.emit(events);
        self.inner.events.notify_value(key, &value);
        self.inner.prefetcher.on_access(self, key);

        Some(value)
    }

    /// Move a colder hit into the hot tier if it fits there
    fn promote(
        &self,
        tiers: &mut [BoundedCache<V>],
        from: usize,
        key: &str,
        now: Instant,
        events: &mut Vec<CacheEvent>,
    ) {
        let fits = tiers[from]
            .peek(key, now)
            .is_some_and(|entry| entry.size() <= tiers[0].capacity());
        if !fits {
            debug!(key, tier = tiers[from].name(), "Entry too large to promote");
            return;
        }

        if let Some(entry) = tiers[from].remove(key) {
            let from_name = tiers[from].name().to_string();
            match self.place(tiers, 0, key.to_string(), entry, now, events) {
                Ok(()) => {
                    events.push(CacheEvent::promote(key, &from_name, tiers[0].name()));
                    self.inner.metrics.record_promotion();
                }
                Err(err) => warn!(key, error = %err, "Promotion failed"),
            }
        }
    }

    /// Drop expired entries from every tier; returns how many went
    fn sweep_expired(tiers: &mut [BoundedCache<V>], now: Instant) -> usize {
        tiers.iter_mut().map(|tier| tier.purge_expired(now)).sum()
    }

    fn record_miss(&self, key: &str) {
        self.inner.metrics.record_miss();
        self.inner.events.emit(vec![CacheEvent::miss(key)]);
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value in the hot tier
    ///
    /// A value larger than the hot tier goes to the hottest tier that can hold
    /// it. A value larger than every tier is rejected with `Error::Capacity`,
    /// and any write after `destroy` with `Error::Destroyed`.
    pub fn set(&self, key: &str, value: V, options: SetOptions) -> Result<()> {
        self.store(key, value, options, false)
    }

    /// Store several values with the same options, stopping at the first error
    pub fn mset<I, S>(&self, items: I, options: SetOptions) -> Result<usize>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
    {
        let mut stored = 0;
        for (key, value) in items {
            self.store(key.as_ref(), value, options.clone(), false)?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Load `keys` concurrently and store them with priority 1
    ///
    /// Keys whose loader fails are logged and skipped. Returns the number stored.
    #[instrument(skip(self, keys, loader))]
    pub async fn warm_up<I, F, Fut, E>(&self, keys: I, loader: F) -> usize
    where
        I: IntoIterator<Item = String>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: std::fmt::Display,
    {
        let keys: Vec<String> = keys.into_iter().collect();
        let loads = keys.iter().map(|key| loader(key.clone()));
        let results = join_all(loads).await;

        let mut stored = 0;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(value) => match self.store(key, value, SetOptions::new().priority(1.0), false) {
                    Ok(()) => stored += 1,
                    Err(err) => warn!(key = %key, error = %err, "Warm-up value not cached"),
                },
                Err(err) => warn!(key = %key, error = %err, "Warm-up load failed"),
            }
        }

        info!(requested = keys.len(), stored, "Cache warm-up finished");
        stored
    }

    pub(crate) fn store(&self, key: &str, value: V, mut options: SetOptions, prefetched: bool) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Destroyed);
        }
        let size = self.estimate(key, &value);
        let notify = self.inner.events.has_value_subscribers().then(|| value.clone());
        let now = Instant::now();
        let mut events = Vec::new();

        let tier = {
            let mut tiers = self.inner.tiers.lock();
            let Some(idx) = tiers.iter().position(|tier| size <= tier.capacity()) else {
                let capacity = tiers.iter().map(|tier| tier.capacity()).max().unwrap_or(0);
                return Err(Error::Capacity {
                    key: key.to_string(),
                    size,
                    capacity,
                });
            };
            if idx > 0 {
                debug!(key, size, tier = tiers[idx].name(), "Value exceeds hot tier, placed lower");
            }

            if options.ttl.is_none() {
                options.ttl = tiers[idx].default_ttl();
            }
            let mut entry = CacheEntry::new(value, size, options, now);
            if prefetched {
                entry = entry.mark_prefetched();
            }

            self.place(&mut tiers, idx, key.to_string(), entry, now, &mut events)?;
            tiers[idx].name().to_string()
        };

        events.push(CacheEvent::set(key, &tier, size));
        self.inner.events.emit(events);
        if let Some(value) = notify {
            self.inner.events.notify_value(key, &value);
        }
        Ok(())
    }

    /// Insert into `tiers[start]`, cascading capacity evictions downward
    fn place(
        &self,
        tiers: &mut [BoundedCache<V>],
        start: usize,
        key: String,
        entry: CacheEntry<V>,
        now: Instant,
        events: &mut Vec<CacheEvent>,
    ) -> Result<()> {
        for (idx, tier) in tiers.iter_mut().enumerate() {
            if idx != start {
                tier.remove(&key);
            }
        }

        let evicted = tiers[start].insert(key, entry, now)?;
        let mut pending: VecDeque<(usize, Evicted<V>)> =
            evicted.into_iter().map(|e| (start, e)).collect();

        while let Some((idx, evicted)) = pending.pop_front() {
            events.push(CacheEvent::evict(&evicted.key, tiers[idx].name(), evicted.reason));
            if evicted.reason == EvictionReason::Expired {
                continue;
            }

            let next = idx + 1;
            if next >= tiers.len() {
                debug!(key = %evicted.key, tier = tiers[idx].name(), "Evicted from coldest tier");
                continue;
            }

            let Evicted { key, entry, .. } = evicted;
            match tiers[next].insert(key.clone(), entry, now) {
                Ok(more) => {
                    events.push(CacheEvent::demote(&key, tiers[idx].name(), tiers[next].name()));
                    self.inner.metrics.record_demotion();
                    pending.extend(more.into_iter().map(|e| (next, e)));
                }
                Err(err) => debug!(key = %key, error = %err, "Evicted entry dropped"),
            }
        }

        Ok(())
    }

    /// Estimate a value's size, falling back to the configured default
    fn estimate(&self, key: &str, value: &V) -> u64 {
        match estimate_size(value) {
            Some(size) => size,
            None => {
                self.inner.metrics.record_serialization_fallback();
                warn!(
                    key,
                    fallback = self.inner.config.default_entry_size,
                    "Size estimation failed, using default"
                );
                self.inner.config.default_entry_size
            }
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove a key from every tier
    pub fn delete(&self, key: &str) -> bool {
        let mut tiers = self.inner.tiers.lock();
        let mut removed = false;
        for tier in tiers.iter_mut() {
            removed |= tier.remove(key).is_some();
        }
        removed
    }

    /// Remove every key matching `pattern` from every tier
    ///
    /// Returns the number of live entries removed.
    pub fn invalidate(&self, pattern: impl Into<KeyPattern>) -> Result<usize> {
        let pattern: KeyPattern = pattern.into();
        let regex = pattern.regex()?;
        let now = Instant::now();

        let count = {
            let mut tiers = self.inner.tiers.lock();
            Self::sweep_expired(&mut tiers, now);
            tiers
                .iter_mut()
                .map(|tier| tier.remove_where(|key, _| regex.is_match(key)).len())
                .sum()
        };

        debug!(pattern = pattern.as_str(), count, "Invalidated by pattern");
        self.inner
            .events
            .emit(vec![CacheEvent::invalidate(pattern.as_str(), count)]);
        Ok(count)
    }

    /// Remove every entry carrying `tag` from every tier
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let now = Instant::now();
        let count = {
            let mut tiers = self.inner.tiers.lock();
            Self::sweep_expired(&mut tiers, now);
            tiers
                .iter_mut()
                .map(|tier| tier.remove_where(|_, entry| entry.has_tag(tag)).len())
                .sum()
        };

        debug!(tag, count, "Invalidated by tag");
        self.inner
            .events
            .emit(vec![CacheEvent::invalidate(&format!("tag:{}", tag), count)]);
        count
    }

    /// Clear one named tier, or every tier when `tier` is `None`
    pub fn clear(&self, tier: Option<&str>) -> Result<()> {
        let mut tiers = self.inner.tiers.lock();
        match tier {
            Some(name) => {
                let target = tiers
                    .iter_mut()
                    .find(|t| t.name() == name)
                    .ok_or_else(|| Error::UnknownTier(name.to_string()))?;
                let removed = target.clear();
                debug!(tier = name, removed, "Cleared tier");
            }
            None => {
                let removed: usize = tiers.iter_mut().map(|t| t.clear()).sum();
                debug!(removed, "Cleared all tiers");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// React to host memory pressure
    ///
    /// `High` clears every tier below hot (coldest first), `Medium` clears the
    /// tier directly below hot, `Low` runs an optimization pass.
    #[instrument(skip(self))]
    pub fn handle_memory_pressure(&self, level: MemoryPressureLevel) {
        let targets = level.tiers_to_clear(self.inner.config.tiers.len());
        if targets.is_empty() {
            if level == MemoryPressureLevel::Low {
                self.optimize();
            }
        } else {
            let mut tiers = self.inner.tiers.lock();
            for idx in targets {
                let removed = tiers[idx].clear();
                info!(tier = tiers[idx].name(), removed, "Cleared tier under memory pressure");
            }
        }

        self.inner
            .events
            .emit(vec![CacheEvent::memory_pressure(level)]);
    }

    /// Sweep expired entries and demote idle hot entries one tier down
    pub fn optimize(&self) -> OptimizeReport {
        let now = Instant::now();
        let mut events = Vec::new();
        let mut report = OptimizeReport::default();

        {
            let mut tiers = self.inner.tiers.lock();
            report.expired_removed = Self::sweep_expired(&mut tiers, now);

            if let (Some(idle), true) = (self.inner.config.idle_demotion, tiers.len() > 1) {
                for key in tiers[0].idle_keys(now, idle) {
                    let fits = tiers[0]
                        .peek(&key, now)
                        .is_some_and(|entry| entry.size() <= tiers[1].capacity());
                    if !fits {
                        continue;
                    }
                    let Some(entry) = tiers[0].remove(&key) else {
                        continue;
                    };
                    let from = tiers[0].name().to_string();
                    if self.place(&mut tiers, 1, key.clone(), entry, now, &mut events).is_ok() {
                        events.push(CacheEvent::demote(&key, &from, tiers[1].name()));
                        self.inner.metrics.record_demotion();
                        report.demoted += 1;
                    }
                }
            }
        }

        report.hit_rate = self.inner.metrics.hit_ratio();
        let accesses = self.inner.metrics.hits() + self.inner.metrics.misses();
        if accesses > 0 && report.hit_rate < 0.5 {
            info!(hit_rate = report.hit_rate, "Low hit rate; consider larger tiers");
        }

        self.inner.events.emit(events);
        report
    }

    /// Replace parts of the prediction config
    pub fn configure_prediction(&self, update: PredictionUpdate) {
        let mut prediction = self.inner.prediction.write();
        prediction.apply(update);
        info!(
            enabled = prediction.enabled,
            look_ahead = prediction.look_ahead,
            patterns = prediction.patterns.len(),
            "Prediction reconfigured"
        );
    }

    /// Attach the source used to load predicted keys
    pub fn set_prefetch_source(&self, source: Arc<dyn PrefetchSource<V>>) {
        self.inner.prefetcher.set_source(source);
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Register a listener for every cache event
    pub fn on_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_event(listener)
    }

    /// Call `callback(key, value)` on every set or hit of a key matching `pattern`
    pub fn subscribe<F>(&self, pattern: impl Into<KeyPattern>, callback: F) -> Result<Subscription>
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        let pattern: KeyPattern = pattern.into();
        let regex = pattern.regex()?.into_owned();
        Ok(self.inner.events.subscribe(regex, callback))
    }

    /// Snapshot statistics for every tier and overall
    ///
    /// Expired entries are swept first, so items and sizes cover live entries.
    pub fn stats(&self) -> CacheStats {
        let layers: Vec<(String, TierStats)> = {
            let mut tiers = self.inner.tiers.lock();
            Self::sweep_expired(&mut tiers, Instant::now());
            tiers
                .iter()
                .map(|tier| (tier.name().to_string(), tier.stats()))
                .collect()
        };
        self.inner.metrics.snapshot(layers)
    }

    /// Name of the tier currently holding a live entry for `key`
    pub fn tier_of(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner
            .tiers
            .lock()
            .iter()
            .find(|tier| tier.contains(key, now))
            .map(|tier| tier.name().to_string())
    }

    /// Check for a live entry without counting a hit
    pub fn has(&self, key: &str) -> bool {
        self.tier_of(key).is_some()
    }

    /// Live keys across all tiers, hottest tier first
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.inner
            .tiers
            .lock()
            .iter()
            .flat_map(|tier| {
                tier.keys()
                    .into_iter()
                    .filter(move |key| tier.contains(key, now))
            })
            .collect()
    }

    /// Live entries held across all tiers
    pub fn len(&self) -> usize {
        let mut tiers = self.inner.tiers.lock();
        Self::sweep_expired(&mut tiers, Instant::now());
        tiers.iter().map(|t| t.len()).sum()
    }

    /// Check if every tier is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tier names, hottest first
    pub fn tier_names(&self) -> Vec<String> {
        self.inner.config.tiers.iter().map(|t| t.name.clone()).collect()
    }

    /// Configuration in effect, including prediction changes made since construction
    pub fn config(&self) -> CacheConfig {
        let mut config = self.inner.config.clone();
        config.prediction = self.prediction_config();
        config
    }

    /// Current prediction settings
    pub fn prediction_config(&self) -> PredictionConfig {
        self.inner.prediction.read().clone()
    }

    /// Access pattern tracker
    pub fn tracker(&self) -> &AccessPatternTracker {
        &self.inner.tracker
    }

    /// Keys with a prefetch queued or running
    pub fn pending_prefetches(&self) -> Vec<String> {
        self.inner.prefetcher.pending()
    }

    pub(crate) fn events(&self) -> &EventBus<V> {
        &self.inner.events
    }

    pub(crate) fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    pub(crate) fn prefetcher(&self) -> &Prefetcher<V> {
        &self.inner.prefetcher
    }

    /// Verify every tier's accounting and that no key sits in two tiers
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let tiers = self.inner.tiers.lock();
        let mut owner: HashMap<String, &str> = HashMap::new();
        for tier in tiers.iter() {
            tier.check_invariants()?;
            for key in tier.keys() {
                if let Some(other) = owner.insert(key.clone(), tier.name()) {
                    return Err(format!(
                        "key '{}' present in both '{}' and '{}'",
                        key,
                        other,
                        tier.name()
                    ));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
