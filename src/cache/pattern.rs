//! Access Pattern Tracking
//!
//! Records recent access times per key and predicts likely-next keys from an
//! explicit pattern table and numeric key suffixes (`page7` → `page8`, ...).
//! Predictions are best-effort hints for the prefetcher, nothing more.

use std::collections::{BTreeMap, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::config::PredictionConfig;

/// Ordering key for the recency index; the sequence breaks ties between
/// accesses recorded at the same instant
type Stamp = (Instant, u64);

#[derive(Debug)]
struct KeyHistory {
    accesses: VecDeque<Instant>,
    stamp: Stamp,
}

/// Keys ordered by their latest access, stalest first
#[derive(Debug, Default)]
struct RecencyIndex {
    order: BTreeMap<Stamp, String>,
    next_seq: u64,
}

impl RecencyIndex {
    fn stamp(&mut self, now: Instant) -> Stamp {
        self.next_seq += 1;
        (now, self.next_seq)
    }
}

/// Per-key access history
///
/// Dropping the stalest key at the cap is a `BTreeMap` pop, so recording
/// stays O(log n) however many keys are tracked.
#[derive(Debug)]
pub struct AccessPatternTracker {
    history: DashMap<String, KeyHistory>,
    recency: Mutex<RecencyIndex>,
    history_len: usize,
    max_keys: usize,
}

impl AccessPatternTracker {
    /// Create a tracker keeping `history_len` timestamps for up to `max_keys` keys
    pub fn new(history_len: usize, max_keys: usize) -> Self {
        Self {
            history: DashMap::new(),
            recency: Mutex::new(RecencyIndex::default()),
            history_len: history_len.max(1),
            max_keys: max_keys.max(1),
        }
    }

    /// Create from prediction config
    pub fn with_config(config: &PredictionConfig) -> Self {
        Self::new(config.history_len, config.max_tracked_keys)
    }

    /// Append `now` to the key's history
    pub fn record(&self, key: &str, now: Instant) {
        // Held for the whole update so the index and the map agree
        let mut recency = self.recency.lock();
        let stamp = recency.stamp(now);

        if let Some(mut history) = self.history.get_mut(key) {
            recency.order.remove(&history.stamp);
            history.stamp = stamp;
            history.accesses.push_back(now);
            while history.accesses.len() > self.history_len {
                history.accesses.pop_front();
            }
        } else {
            while self.history.len() >= self.max_keys {
                match recency.order.pop_first() {
                    Some((_, stalest)) => {
                        self.history.remove(&stalest);
                    }
                    None => break,
                }
            }
            self.history.insert(
                key.to_string(),
                KeyHistory {
                    accesses: VecDeque::from([now]),
                    stamp,
                },
            );
        }

        recency.order.insert(stamp, key.to_string());
    }

    /// Recorded access times for a key, oldest first
    pub fn history(&self, key: &str) -> Vec<Instant> {
        self.history
            .get(key)
            .map(|h| h.accesses.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of retained accesses for a key
    pub fn access_count(&self, key: &str) -> usize {
        self.history.get(key).map_or(0, |h| h.accesses.len())
    }

    /// Number of keys with history
    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }

    /// Forget everything
    pub fn clear(&self) {
        let mut recency = self.recency.lock();
        recency.order.clear();
        self.history.clear();
    }

    /// Predict keys likely to be requested after `key`
    ///
    /// Explicit patterns come first, then numeric-suffix successors. The result
    /// has no duplicates, never contains `key` and holds at most `look_ahead` keys.
    pub fn predict(&self, key: &str, config: &PredictionConfig) -> Vec<String> {
        let limit = config.look_ahead;
        let mut predictions: Vec<String> = Vec::with_capacity(limit);

        let push = |candidate: String, predictions: &mut Vec<String>| {
            if predictions.len() < limit && candidate != key && !predictions.contains(&candidate) {
                predictions.push(candidate);
            }
        };

        if let Some(explicit) = config.patterns.get(key) {
            for candidate in explicit {
                push(candidate.clone(), &mut predictions);
            }
        }

        if let Some((prefix, n)) = split_numeric_suffix(key) {
            for step in 1..=limit as u64 {
                match n.checked_add(step) {
                    Some(next) => push(format!("{}{}", prefix, next), &mut predictions),
                    None => break,
                }
            }
        }

        predictions
    }
}

/// Split `"page12"` into `("page", 12)`; requires a non-empty prefix
fn split_numeric_suffix(key: &str) -> Option<(&str, u64)> {
    let digits = key.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits == key.len() {
        return None;
    }
    let (prefix, suffix) = key.split_at(key.len() - digits);
    suffix.parse().ok().map(|n| (prefix, n))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(look_ahead: usize) -> PredictionConfig {
        PredictionConfig {
            look_ahead,
            ..Default::default()
        }
    }

    #[test]
    fn test_split_numeric_suffix() {
        assert_eq!(split_numeric_suffix("page12"), Some(("page", 12)));
        assert_eq!(split_numeric_suffix("user:007"), Some(("user:", 7)));
        assert_eq!(split_numeric_suffix("page"), None);
        assert_eq!(split_numeric_suffix("12345"), None);
        assert_eq!(split_numeric_suffix(""), None);
        // Does not fit in u64
        assert_eq!(split_numeric_suffix("k99999999999999999999999"), None);
    }

    #[test]
    fn test_sequential_prediction() {
        let tracker = AccessPatternTracker::new(10, 100);
        assert_eq!(
            tracker.predict("item:1", &config(3)),
            vec!["item:2", "item:3", "item:4"]
        );
    }

    #[test]
    fn test_explicit_pattern_takes_precedence() {
        let tracker = AccessPatternTracker::new(10, 100);
        let mut cfg = config(3);
        cfg.patterns.insert(
            "chapter1".to_string(),
            vec!["glossary".to_string(), "chapter2".to_string()],
        );

        // Explicit list first, then suffix successors, deduplicated and capped
        assert_eq!(
            tracker.predict("chapter1", &cfg),
            vec!["glossary", "chapter2", "chapter3"]
        );
    }

    #[test]
    fn test_prediction_never_includes_self_and_caps_length() {
        let tracker = AccessPatternTracker::new(10, 100);
        let mut cfg = config(2);
        cfg.patterns = HashMap::from([(
            "home".to_string(),
            vec!["home".to_string(), "a".into(), "b".into(), "c".into()],
        )]);

        assert_eq!(tracker.predict("home", &cfg), vec!["a", "b"]);
    }

    #[test]
    fn test_no_pattern_no_prediction() {
        let tracker = AccessPatternTracker::new(10, 100);
        assert!(tracker.predict("settings", &config(3)).is_empty());
        assert!(tracker.predict("page1", &config(0)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let tracker = AccessPatternTracker::new(3, 100);
        for _ in 0..5 {
            tracker.record("k", Instant::now());
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        let history = tracker.history("k");
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tracker.access_count("k"), 3);
        assert_eq!(tracker.access_count("other"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_cap_drops_stalest() {
        let tracker = AccessPatternTracker::new(5, 2);
        tracker.record("a", Instant::now());
        tokio::time::advance(Duration::from_millis(1)).await;
        tracker.record("b", Instant::now());
        tokio::time::advance(Duration::from_millis(1)).await;
        tracker.record("a", Instant::now());
        tokio::time::advance(Duration::from_millis(1)).await;
        tracker.record("c", Instant::now());

        assert_eq!(tracker.tracked_keys(), 2);
        assert!(tracker.history("b").is_empty());
        assert_eq!(tracker.access_count("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_cap_holds_under_churn() {
        let tracker = AccessPatternTracker::new(2, 100);
        for i in 0..100 {
            tracker.record(&format!("seed{}", i), Instant::now());
        }
        tokio::time::advance(Duration::from_millis(1)).await;
        // Keep one seed key warm while new keys stream in
        tracker.record("seed0", Instant::now());

        for i in 0..5_000 {
            tracker.record(&format!("new{}", i), Instant::now());
            if i % 50 == 0 {
                tracker.record("seed0", Instant::now());
            }
            tokio::time::advance(Duration::from_micros(10)).await;
        }

        assert_eq!(tracker.tracked_keys(), 100);
        assert_eq!(tracker.recency.lock().order.len(), 100);
        assert_eq!(tracker.access_count("seed0"), 2);
        assert_eq!(tracker.access_count("seed1"), 0);
        assert_eq!(tracker.access_count("new4999"), 1);
        assert_eq!(tracker.access_count("new4901"), 1);
        assert_eq!(tracker.access_count("new4900"), 0);
    }

    #[test]
    fn test_same_instant_records_keep_arrival_order() {
        let tracker = AccessPatternTracker::new(5, 2);
        let now = Instant::now();
        tracker.record("a", now);
        tracker.record("b", now);
        tracker.record("c", now);

        assert_eq!(tracker.access_count("a"), 0);
        assert_eq!(tracker.access_count("b"), 1);
        assert_eq!(tracker.access_count("c"), 1);
    }

    #[test]
    fn test_clear() {
        let tracker = AccessPatternTracker::new(5, 10);
        let now = Instant::now();
        tracker.record("a", now);
        tracker.record("b", now);

        tracker.clear();
        assert_eq!(tracker.tracked_keys(), 0);
        assert!(tracker.recency.lock().order.is_empty());

        tracker.record("a", now);
        assert_eq!(tracker.tracked_keys(), 1);
    }
}
