//! Cache Configuration
//!
//! Tier layout, eviction and prediction settings. Everything deserializes from
//! YAML/JSON with defaults for missing fields; durations are written as
//! integer milliseconds.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::EvictionPolicy;
use super::{DEFAULT_ENTRY_SIZE, DEFAULT_HISTORY_LEN, DEFAULT_LOOK_AHEAD};
use crate::error::{Error, Result};

/// Configuration of a single tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier name ("hot", "warm", ...)
    pub name: String,
    /// Byte budget
    pub max_bytes: u64,
    /// Item budget
    pub max_items: usize,
    /// TTL applied to entries stored without an explicit one
    #[serde(default, with = "duration_ms::option")]
    pub default_ttl: Option<Duration>,
}

impl TierConfig {
    /// Create a tier config without a default TTL
    pub fn new(name: impl Into<String>, max_bytes: u64, max_items: usize) -> Self {
        Self {
            name: name.into(),
            max_bytes,
            max_items,
            default_ttl: None,
        }
    }

    /// Set the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }
}

/// Predictive prefetch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Enable prediction and prefetch
    pub enabled: bool,
    /// Maximum number of keys predicted per access
    pub look_ahead: usize,
    /// Explicit key -> likely-next-keys table
    pub patterns: HashMap<String, Vec<String>>,
    /// Delay before a scheduled prefetch runs (batches bursts)
    #[serde(with = "duration_ms")]
    pub prefetch_delay: Duration,
    /// Access timestamps kept per key
    pub history_len: usize,
    /// Upper bound on keys with recorded history
    pub max_tracked_keys: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            look_ahead: DEFAULT_LOOK_AHEAD,
            patterns: HashMap::new(),
            prefetch_delay: Duration::from_millis(100),
            history_len: DEFAULT_HISTORY_LEN,
            max_tracked_keys: 10_000,
        }
    }
}

/// Partial update for [`PredictionConfig`]; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct PredictionUpdate {
    pub enabled: Option<bool>,
    pub look_ahead: Option<usize>,
    pub patterns: Option<HashMap<String, Vec<String>>>,
    pub prefetch_delay: Option<Duration>,
}

impl PredictionUpdate {
    /// Toggle prediction
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Change look-ahead
    pub fn look_ahead(mut self, look_ahead: usize) -> Self {
        self.look_ahead = Some(look_ahead);
        self
    }

    /// Replace the explicit pattern table
    pub fn patterns(mut self, patterns: HashMap<String, Vec<String>>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Change the prefetch delay
    pub fn prefetch_delay(mut self, delay: Duration) -> Self {
        self.prefetch_delay = Some(delay);
        self
    }
}

impl PredictionConfig {
    /// Merge a partial update into this config
    pub fn apply(&mut self, update: PredictionUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(look_ahead) = update.look_ahead {
            self.look_ahead = look_ahead;
        }
        if let Some(patterns) = update.patterns {
            self.patterns = patterns;
        }
        if let Some(delay) = update.prefetch_delay {
            self.prefetch_delay = delay;
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Tiers ordered hottest to coldest
    pub tiers: Vec<TierConfig>,
    /// Eviction policy shared by all tiers
    pub eviction: EvictionPolicy,
    /// Prediction settings
    pub prediction: PredictionConfig,
    /// Period of the background optimization pass (`None` disables it)
    #[serde(with = "duration_ms::option")]
    pub optimize_interval: Option<Duration>,
    /// Hot entries idle this long are demoted during optimization
    #[serde(with = "duration_ms::option")]
    pub idle_demotion: Option<Duration>,
    /// Size assumed when a value cannot be serialized for estimation
    pub default_entry_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig::new("hot", 1024 * 1024, 100),
                TierConfig::new("warm", 5 * 1024 * 1024, 500),
                TierConfig::new("cold", 20 * 1024 * 1024, 2000),
            ],
            eviction: EvictionPolicy::default(),
            prediction: PredictionConfig::default(),
            optimize_interval: Some(Duration::from_secs(60)),
            idle_demotion: Some(Duration::from_secs(300)),
            default_entry_size: DEFAULT_ENTRY_SIZE,
        }
    }
}

impl CacheConfig {
    /// Config with the given tiers and defaults for everything else
    pub fn with_tiers(tiers: Vec<TierConfig>) -> Self {
        Self {
            tiers,
            ..Default::default()
        }
    }

    /// Parse from a YAML (or JSON) string and validate
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML config file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check the config for values the cache cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(Error::Config("at least one tier is required".to_string()));
        }

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if tier.name.is_empty() {
                return Err(Error::Config("tier name must not be empty".to_string()));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(Error::Config(format!("duplicate tier name '{}'", tier.name)));
            }
            if tier.max_bytes == 0 || tier.max_items == 0 {
                return Err(Error::Config(format!(
                    "tier '{}' must have non-zero capacity",
                    tier.name
                )));
            }
        }

        if self.eviction.scan_window == 0 {
            return Err(Error::Config("eviction scan window must be at least 1".to_string()));
        }
        if self.prediction.history_len == 0 {
            return Err(Error::Config("prediction history length must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Name of the hottest tier
    pub fn hot_tier(&self) -> Option<&str> {
        self.tiers.first().map(|t| t.name.as_str())
    }
}

/// Serde helpers writing `Duration` as integer milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
