//! Cache Events
//!
//! Observable side effects of cache operations, limited to the documented
//! `cache:*` names. Listeners register through [`EventBus`] and are detached
//! when their [`Subscription`] is dropped.
//!
//! # Example
//!
//! ```ignore
//! let recorder = EventRecorder::new();
//! let _sub = cache.on_event(recorder.listener());
//! cache.set("user:1", user, SetOptions::new())?;
//! assert_eq!(recorder.types(), vec!["cache:set"]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bounded::EvictionReason;
use super::policy::MemoryPressureLevel;

/// Event emitted by the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// A `get` was served from a tier.
    #[serde(rename = "cache:hit")]
    Hit {
        key: String,
        tier: String,
        timestamp: DateTime<Utc>,
    },

    /// A `get` found the key in no tier.
    #[serde(rename = "cache:miss")]
    Miss {
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A value was stored.
    #[serde(rename = "cache:set")]
    Set {
        key: String,
        tier: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// An entry was pushed out of a tier.
    #[serde(rename = "cache:evict")]
    Evict {
        key: String,
        tier: String,
        expired: bool,
        timestamp: DateTime<Utc>,
    },

    /// An entry moved to the hot tier on a read.
    #[serde(rename = "cache:promote")]
    Promote {
        key: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// An entry moved to a colder tier.
    #[serde(rename = "cache:demote")]
    Demote {
        key: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// Entries were invalidated by pattern or tag.
    #[serde(rename = "cache:invalidate")]
    Invalidate {
        pattern: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A predicted key was prefetched.
    #[serde(rename = "cache:prefetch")]
    Prefetch {
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// The host reported memory pressure.
    #[serde(rename = "cache:memory:pressure")]
    MemoryPressure {
        level: MemoryPressureLevel,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    pub fn hit(key: &str, tier: &str) -> Self {
        CacheEvent::Hit {
            key: key.to_string(),
            tier: tier.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn miss(key: &str) -> Self {
        CacheEvent::Miss {
            key: key.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn set(key: &str, tier: &str, size_bytes: u64) -> Self {
        CacheEvent::Set {
            key: key.to_string(),
            tier: tier.to_string(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    pub fn evict(key: &str, tier: &str, reason: EvictionReason) -> Self {
        CacheEvent::Evict {
            key: key.to_string(),
            tier: tier.to_string(),
            expired: reason == EvictionReason::Expired,
            timestamp: Utc::now(),
        }
    }

    pub fn promote(key: &str, from: &str, to: &str) -> Self {
        CacheEvent::Promote {
            key: key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn demote(key: &str, from: &str, to: &str) -> Self {
        CacheEvent::Demote {
            key: key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn invalidate(pattern: &str, count: usize) -> Self {
        CacheEvent::Invalidate {
            pattern: pattern.to_string(),
            count,
            timestamp: Utc::now(),
        }
    }

    pub fn prefetch(key: &str) -> Self {
        CacheEvent::Prefetch {
            key: key.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn memory_pressure(level: MemoryPressureLevel) -> Self {
        CacheEvent::MemoryPressure {
            level,
            timestamp: Utc::now(),
        }
    }

    /// Documented event name
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "cache:hit",
            CacheEvent::Miss { .. } => "cache:miss",
            CacheEvent::Set { .. } => "cache:set",
            CacheEvent::Evict { .. } => "cache:evict",
            CacheEvent::Promote { .. } => "cache:promote",
            CacheEvent::Demote { .. } => "cache:demote",
            CacheEvent::Invalidate { .. } => "cache:invalidate",
            CacheEvent::Prefetch { .. } => "cache:prefetch",
            CacheEvent::MemoryPressure { .. } => "cache:memory:pressure",
        }
    }

    /// Key the event is about, if it concerns a single key
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key, .. }
            | CacheEvent::Set { key, .. }
            | CacheEvent::Evict { key, .. }
            | CacheEvent::Promote { key, .. }
            | CacheEvent::Demote { key, .. }
            | CacheEvent::Prefetch { key, .. } => Some(key),
            CacheEvent::Invalidate { .. } | CacheEvent::MemoryPressure { .. } => None,
        }
    }
}

type EventListener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;
type KeyListener<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

trait ListenerRegistry: Send + Sync {
    fn remove(&self, id: u64);
}

/// Handle to a registered listener; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Option<Weak<dyn ListenerRegistry>>,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener registered for the lifetime of the cache
    pub fn detach(mut self) {
        self.registry = None;
    }

    fn release(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.registry.is_some())
            .finish()
    }
}

struct Listeners<V> {
    events: RwLock<Vec<(u64, EventListener)>>,
    keys: RwLock<Vec<(u64, Regex, KeyListener<V>)>>,
}

impl<V: Send + Sync + 'static> ListenerRegistry for Listeners<V> {
    fn remove(&self, id: u64) {
        self.events.write().retain(|(i, _)| *i != id);
        self.keys.write().retain(|(i, _, _)| *i != id);
    }
}

/// Observer registry for cache events
pub struct EventBus<V> {
    next_id: AtomicU64,
    listeners: Arc<Listeners<V>>,
}

impl<V: Send + Sync + 'static> Default for EventBus<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> EventBus<V> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Arc::new(Listeners {
                events: RwLock::new(Vec::new()),
                keys: RwLock::new(Vec::new()),
            }),
        }
    }

    fn subscription(&self, id: u64) -> Subscription {
        let registry: Arc<dyn ListenerRegistry> = self.listeners.clone();
        Subscription {
            id,
            registry: Some(Arc::downgrade(&registry)),
        }
    }

    /// Register a listener for every event
    pub fn on_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.events.write().push((id, Arc::new(listener)));
        self.subscription(id)
    }

    /// Register a callback for sets and hits of keys matching `pattern`
    pub fn subscribe<F>(&self, pattern: Regex, callback: F) -> Subscription
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.keys.write().push((id, pattern, Arc::new(callback)));
        self.subscription(id)
    }

    /// Deliver events to listeners. Must not be called while holding the tier lock.
    pub fn emit(&self, events: Vec<CacheEvent>) {
        if events.is_empty() {
            return;
        }

        for event in &events {
            debug!(event_type = event.event_type(), key = event.key().unwrap_or(""), "Cache event");
        }

        let listeners: Vec<EventListener> = self
            .listeners
            .events
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }

    /// Deliver a key/value notification to matching subscribers
    pub fn notify_value(&self, key: &str, value: &V) {
        let matching: Vec<KeyListener<V>> = self
            .listeners
            .keys
            .read()
            .iter()
            .filter(|(_, pattern, _)| pattern.is_match(key))
            .map(|(_, _, callback)| callback.clone())
            .collect();

        for callback in matching {
            callback(key, value);
        }
    }

    /// True when any key subscriber exists
    pub fn has_value_subscribers(&self) -> bool {
        !self.listeners.keys.read().is_empty()
    }

    /// Number of registered listeners of both kinds
    pub fn listener_count(&self) -> usize {
        self.listeners.events.read().len() + self.listeners.keys.read().len()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.events.write().clear();
        self.listeners.keys.write().clear();
    }
}

/// In-memory event collector.
///
/// Collects events for later inspection in tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<RwLock<Vec<CacheEvent>>>,
}

impl EventRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener closure feeding this recorder
    pub fn listener(&self) -> impl Fn(&CacheEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.write().push(event.clone())
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.read().clone()
    }

    /// Event names in arrival order
    pub fn types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.event_type()).collect()
    }

    /// Get events of a specific type
    pub fn of_type(&self, event_type: &str) -> Vec<CacheEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Count events of a specific type
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Get the count of collected events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if there are no events
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
