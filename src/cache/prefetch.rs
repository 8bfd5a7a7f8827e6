//! Predictive Prefetch
//!
//! After an access, predicted keys that are not cached are loaded from a
//! [`PrefetchSource`] on a background task and stored in the hot tier.
//! Prefetching is best-effort: failures are counted and logged, never
//! surfaced to the caller whose access triggered them.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::entry::SetOptions;
use super::events::CacheEvent;
use super::manager::{CacheValue, SmartCache};
use crate::error::{Error, Result};

/// Loads values for predicted keys
#[async_trait]
pub trait PrefetchSource<V>: Send + Sync {
    /// Fetch the value for `key`, `None` when it does not exist
    async fn fetch(&self, key: &str) -> Result<Option<V>>;
}

/// Adapts an async closure into a [`PrefetchSource`]
pub struct FnSource<F>(F);

impl<F> FnSource<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<V, F, Fut> PrefetchSource<V> for FnSource<F>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<V>>> + Send + 'static,
{
    async fn fetch(&self, key: &str) -> Result<Option<V>> {
        (self.0)(key.to_string()).await
    }
}

/// In-memory prefetch source for testing
///
/// Uses DashMap so values can be added while prefetches run.
pub struct InMemorySource<V> {
    values: DashMap<String, V>,
    fetches: AtomicU64,
}

impl<V: Clone + Send + Sync> InMemorySource<V> {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.values.insert(key.into(), value);
    }

    /// Number of `fetch` calls served
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl<V: Clone + Send + Sync> Default for InMemorySource<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> PrefetchSource<V> for InMemorySource<V> {
    async fn fetch(&self, key: &str) -> Result<Option<V>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }
}

/// Schedules and runs prefetches for one cache
pub struct Prefetcher<V> {
    pending: DashMap<String, ()>,
    source: RwLock<Option<Arc<dyn PrefetchSource<V>>>>,
}

impl<V: CacheValue> Prefetcher<V> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            source: RwLock::new(None),
        }
    }

    pub fn set_source(&self, source: Arc<dyn PrefetchSource<V>>) {
        *self.source.write() = Some(source);
    }

    pub fn has_source(&self) -> bool {
        self.source.read().is_some()
    }

    /// Keys queued or in flight
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Queue prefetches for the keys predicted after `key`
    ///
    /// Each predicted key is scheduled at most once until its prefetch
    /// finishes. Does nothing outside a tokio runtime.
    pub fn on_access(&self, cache: &SmartCache<V>, key: &str) {
        if cache.is_destroyed() || !self.has_source() {
            return;
        }
        let config = cache.prediction_config();
        if !config.enabled || config.look_ahead == 0 {
            return;
        }

        let predicted = cache.tracker().predict(key, &config);
        if predicted.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(key, "No tokio runtime, prefetch skipped");
            return;
        };

        for next in predicted {
            if cache.has(&next) || self.pending.insert(next.clone(), ()).is_some() {
                continue;
            }
            cache.metrics().record_prefetch_scheduled();
            debug!(trigger = key, key = %next, "Prefetch scheduled");

            let cache = cache.clone();
            let delay = config.prefetch_delay;
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                cache.prefetcher().prefetch(&cache, &next).await;
            });
        }
    }

    /// Load `key` from the source into the hot tier
    pub async fn prefetch(&self, cache: &SmartCache<V>, key: &str) {
        if let Err(err) = self.try_prefetch(cache, key).await {
            cache.metrics().record_prefetch_failed();
            warn!(key, error = %err, "Prefetch failed");
        }
        self.pending.remove(key);
    }

    async fn try_prefetch(&self, cache: &SmartCache<V>, key: &str) -> Result<()> {
        let source = self.source.read().clone();
        let Some(source) = source else {
            return Ok(());
        };
        if cache.is_destroyed() || cache.has(key) {
            return Ok(());
        }

        cache.events().emit(vec![CacheEvent::prefetch(key)]);
        let value = source
            .fetch(key)
            .await
            .map_err(|err| Error::prefetch(key, err.to_string()))?;

        match value {
            Some(value) => {
                // A regular set may have landed while the source was loading
                if cache.has(key) {
                    return Ok(());
                }
                cache.store(key, value, SetOptions::new(), true)?;
                cache.metrics().record_prefetch_completed();
                debug!(key, "Prefetch stored");
            }
            None => debug!(key, "Prefetch source has no value"),
        }
        Ok(())
    }
}

impl<V: CacheValue> Default for Prefetcher<V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{CacheConfig, PredictionUpdate};
    use crate::cache::events::EventRecorder;
    use std::collections::HashMap;
    use std::time::Duration;

    fn cache_with_source(source: Arc<dyn PrefetchSource<String>>) -> SmartCache<String> {
        let mut config = CacheConfig::default();
        config.optimize_interval = None;
        config.prediction.prefetch_delay = Duration::from_millis(100);
        let cache = SmartCache::new(config).unwrap();
        cache.set_prefetch_source(source);
        cache
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_access_prefetches_successors() {
        let source = Arc::new(InMemorySource::<String>::new());
        for i in 1..=5 {
            source.insert(format!("page{}", i), format!("content {}", i));
        }
        let cache = cache_with_source(source.clone());
        let recorder = EventRecorder::new();
        let _sub = cache.on_event(recorder.listener());

        cache.set("page1", "content 1".to_string(), SetOptions::new()).unwrap();
        cache.get("page1").await;
        assert_eq!(cache.pending_prefetches().len(), 3);

        tokio::time::sleep(Duration::from_millis(150)).await;

        for key in ["page2", "page3", "page4"] {
            assert_eq!(cache.tier_of(key).as_deref(), Some("hot"), "{} not prefetched", key);
        }
        assert!(!cache.has("page5"));
        assert!(cache.pending_prefetches().is_empty());
        assert_eq!(recorder.count("cache:prefetch"), 3);

        // A read of a prefetched entry counts as useful and queues page5
        cache.get("page2").await;
        let predictions = cache.stats().predictions;
        assert_eq!(predictions.scheduled, 4);
        assert_eq!(predictions.completed, 3);
        assert_eq!(predictions.useful, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_patterns() {
        let source = Arc::new(InMemorySource::<String>::new());
        source.insert("profile", "p".to_string());
        let cache = cache_with_source(source.clone());
        cache.configure_prediction(PredictionUpdate::default().patterns(HashMap::from([(
            "home".to_string(),
            vec!["profile".to_string(), "absent".to_string()],
        )])));

        cache.set("home", "h".to_string(), SetOptions::new()).unwrap();
        cache.get("home").await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.has("profile"));
        assert!(!cache.has("absent"));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_prediction_schedules_nothing() {
        let source = Arc::new(InMemorySource::<String>::new());
        source.insert("page2", "x".to_string());
        let cache = cache_with_source(source.clone());
        cache.configure_prediction(PredictionUpdate::default().enabled(false));

        cache.set("page1", "x".to_string(), SetOptions::new()).unwrap();
        cache.get("page1").await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!cache.has("page2"));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_access_dedupes_pending() {
        let source = Arc::new(InMemorySource::<String>::new());
        let cache = cache_with_source(source.clone());
        cache.configure_prediction(PredictionUpdate::default().look_ahead(1));

        cache.set("item1", "x".to_string(), SetOptions::new()).unwrap();
        cache.get("item1").await;
        cache.get("item1").await;
        cache.get("item1").await;
        assert_eq!(cache.pending_prefetches(), vec!["item2".to_string()]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(source.fetches(), 1);
        assert_eq!(cache.stats().predictions.scheduled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_is_counted_not_raised() {
        let source = FnSource::new(|key: String| async move {
            Err::<Option<String>, _>(Error::Internal(format!("backend down for {}", key)))
        });
        let cache = cache_with_source(Arc::new(source));

        cache.set("row1", "x".to_string(), SetOptions::new()).unwrap();
        assert_eq!(cache.get("row1").await.as_deref(), Some("x"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let predictions = cache.stats().predictions;
        assert_eq!(predictions.failed, 3);
        assert_eq!(predictions.completed, 0);
        assert!(cache.pending_prefetches().is_empty());
    }

    #[tokio::test]
    async fn test_without_source_nothing_scheduled() {
        let cache: SmartCache<String> = SmartCache::with_defaults();
        cache.set("page1", "x".to_string(), SetOptions::new()).unwrap();
        cache.get("page1").await;
        assert!(cache.pending_prefetches().is_empty());
    }
}
