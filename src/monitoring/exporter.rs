//! Prometheus exporter for cache statistics
//!
//! Gauges are refreshed from a [`CacheStats`] snapshot, so the exporter never
//! touches the cache itself. Each exporter owns its registry.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheStats;
use crate::error::{Error, Result};

const NAMESPACE: &str = "tiercache";

/// Renders [`CacheStats`] as Prometheus metrics
pub struct PrometheusExporter {
    registry: Registry,
    tier_hits: GaugeVec,
    tier_misses: GaugeVec,
    tier_evictions: GaugeVec,
    tier_expirations: GaugeVec,
    tier_bytes: GaugeVec,
    tier_items: GaugeVec,
    tier_hit_rate: GaugeVec,
    hits: Gauge,
    misses: Gauge,
    hit_rate: Gauge,
    promotions: Gauge,
    demotions: Gauge,
    prefetch: GaugeVec,
    prefetch_accuracy: Gauge,
    serialization_fallbacks: Gauge,
}

impl PrometheusExporter {
    /// Create an exporter with all metrics registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tier_gauge = |name: &str, help: &str| -> Result<GaugeVec> {
            let gauge = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["tier"])?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let tier_hits = tier_gauge("tier_hits", "Lookups served by the tier")?;
        let tier_misses = tier_gauge("tier_misses", "Lookups that did not find the key in the tier")?;
        let tier_evictions = tier_gauge("tier_evictions", "Entries evicted from the tier")?;
        let tier_expirations = tier_gauge("tier_expirations", "Entries dropped from the tier on TTL expiry")?;
        let tier_bytes = tier_gauge("tier_size_bytes", "Estimated bytes held by the tier")?;
        let tier_items = tier_gauge("tier_items", "Entries held by the tier")?;
        let tier_hit_rate = tier_gauge("tier_hit_rate", "Hit rate of the tier")?;

        let gauge = |name: &str, help: &str| -> Result<Gauge> {
            let gauge = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let hits = gauge("hits", "Get calls served from any tier")?;
        let misses = gauge("misses", "Get calls that found no tier holding the key")?;
        let hit_rate = gauge("hit_rate", "Overall hit rate of get calls")?;
        let promotions = gauge("promotions", "Entries moved to a hotter tier on a hit")?;
        let demotions = gauge("demotions", "Entries cascaded to a colder tier on eviction")?;
        let prefetch_accuracy = gauge("prefetch_accuracy", "Prefetched entries later read, per prefetch stored")?;
        let serialization_fallbacks = gauge(
            "serialization_fallbacks",
            "Values sized with the default estimate",
        )?;

        let prefetch = GaugeVec::new(
            Opts::new("prefetch", "Prefetch outcomes").namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(prefetch.clone()))?;

        Ok(Self {
            registry,
            tier_hits,
            tier_misses,
            tier_evictions,
            tier_expirations,
            tier_bytes,
            tier_items,
            tier_hit_rate,
            hits,
            misses,
            hit_rate,
            promotions,
            demotions,
            prefetch,
            prefetch_accuracy,
            serialization_fallbacks,
        })
    }

    /// Refresh all gauges from a stats snapshot
    pub fn update(&self, stats: &CacheStats) {
        for (tier, s) in &stats.layers {
            let labels = [tier.as_str()];
            self.tier_hits.with_label_values(&labels).set(s.hits as f64);
            self.tier_misses.with_label_values(&labels).set(s.misses as f64);
            self.tier_evictions.with_label_values(&labels).set(s.evictions as f64);
            self.tier_expirations.with_label_values(&labels).set(s.expirations as f64);
            self.tier_bytes.with_label_values(&labels).set(s.size_bytes as f64);
            self.tier_items.with_label_values(&labels).set(s.items as f64);
            self.tier_hit_rate.with_label_values(&labels).set(s.hit_rate);
        }

        self.hits.set(stats.overall.hits as f64);
        self.misses.set(stats.overall.misses as f64);
        self.hit_rate.set(stats.overall.hit_rate);
        self.promotions.set(stats.promotions as f64);
        self.demotions.set(stats.demotions as f64);

        let p = &stats.predictions;
        for (outcome, value) in [
            ("scheduled", p.scheduled),
            ("completed", p.completed),
            ("failed", p.failed),
            ("useful", p.useful),
        ] {
            self.prefetch.with_label_values(&[outcome]).set(value as f64);
        }
        self.prefetch_accuracy.set(p.accuracy);
        self.serialization_fallbacks.set(stats.serialization_fallbacks as f64);
    }

    /// Encode the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
    }

    /// Underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{SetOptions, SmartCache};

    #[tokio::test]
    async fn test_render_reflects_stats() {
        let cache: SmartCache<String> = SmartCache::with_defaults();
        cache.set("a", "1".to_string(), SetOptions::new()).unwrap();
        cache.get("a").await;
        cache.get("b").await;

        let exporter = PrometheusExporter::new().unwrap();
        exporter.update(&cache.stats());
        let text = exporter.render().unwrap();

        assert!(text.contains("tiercache_hits 1"));
        assert!(text.contains("tiercache_misses 1"));
        assert!(text.contains("tiercache_hit_rate 0.5"));
        assert!(text.contains("tiercache_tier_items{tier=\"hot\"} 1"));
        assert!(text.contains("tiercache_tier_items{tier=\"cold\"} 0"));
        assert!(text.contains("tiercache_prefetch{outcome=\"scheduled\"} 0"));
    }

    #[test]
    fn test_tier_movements_exported() {
        let stats = CacheStats {
            promotions: 2,
            demotions: 5,
            ..Default::default()
        };

        let exporter = PrometheusExporter::new().unwrap();
        exporter.update(&stats);
        let text = exporter.render().unwrap();

        assert!(text.contains("tiercache_promotions 2"));
        assert!(text.contains("tiercache_demotions 5"));
    }

    #[test]
    fn test_exporters_are_independent() {
        let first = PrometheusExporter::new().unwrap();
        let second = PrometheusExporter::new().unwrap();
        first.hits.set(3.0);
        assert_eq!(second.hits.get(), 0.0);
    }
}
