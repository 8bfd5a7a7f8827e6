//! Cache Eviction and Memory-Pressure Policies
//!
//! Configurable policies for choosing eviction victims and for shedding tiers
//! when the host signals memory pressure.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Eviction policy configuration
///
/// Victims are picked from the least-recently-used end of a tier. Only the
/// first `scan_window` keys are scored, and the lowest score is evicted:
///
/// ```text
/// score = (hits * frequency_weight + priority * priority_weight) / (recency_ms + age_ms)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Name of the policy
    pub name: String,
    /// Number of LRU-end candidates scored per eviction
    pub scan_window: usize,
    /// Weight for hit count
    pub frequency_weight: f64,
    /// Weight for caller-assigned priority
    pub priority_weight: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

impl EvictionPolicy {
    /// Frequency/priority/recency hybrid (default)
    pub fn balanced() -> Self {
        Self {
            name: "Balanced".to_string(),
            scan_window: 10,
            frequency_weight: 1000.0,
            priority_weight: 10000.0,
        }
    }

    /// Strict LRU
    ///
    /// Every candidate scores zero, so the tie-break (least recently used) decides.
    pub fn lru() -> Self {
        Self {
            name: "LRU".to_string(),
            scan_window: 1,
            frequency_weight: 0.0,
            priority_weight: 0.0,
        }
    }

    /// Frequency-heavy policy
    ///
    /// Scores a wider window and lets hit count dominate priority.
    pub fn frequency_biased() -> Self {
        Self {
            name: "FrequencyBiased".to_string(),
            scan_window: 32,
            frequency_weight: 10000.0,
            priority_weight: 1000.0,
        }
    }

    /// Calculate eviction score (lower = evicted first)
    pub fn score(&self, hit_count: u64, priority: f64, recency: Duration, age: Duration) -> f64 {
        let weight = hit_count as f64 * self.frequency_weight + priority * self.priority_weight;
        let elapsed_ms = (recency.as_millis() + age.as_millis()).max(1) as f64;
        weight / elapsed_ms
    }
}

/// Memory pressure level reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    /// Optimize only
    Low,
    /// Drop the warm tier
    Medium,
    /// Drop everything but the hot tier
    High,
}

impl MemoryPressureLevel {
    /// Tier indices to clear for this level, given `tier_count` tiers ordered hot→cold.
    ///
    /// `High` clears coldest first and falls through to the warm tier. `Medium`
    /// clears only the tier directly below hot. `Low` clears nothing.
    pub fn tiers_to_clear(&self, tier_count: usize) -> Vec<usize> {
        match self {
            MemoryPressureLevel::High => (1..tier_count).rev().collect(),
            MemoryPressureLevel::Medium if tier_count > 1 => vec![1],
            _ => Vec::new(),
        }
    }

    /// Level name as reported in events
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressureLevel::Low => "low",
            MemoryPressureLevel::Medium => "medium",
            MemoryPressureLevel::High => "high",
        }
    }
}

impl std::fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryPressureLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(MemoryPressureLevel::Low),
            "medium" => Ok(MemoryPressureLevel::Medium),
            "high" => Ok(MemoryPressureLevel::High),
            other => Err(Error::Config(format!(
                "unknown memory pressure level '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
