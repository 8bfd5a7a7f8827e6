//! tiercache - workload driver
//!
//! Builds a cache from defaults or a YAML file, replays a synthetic read
//! workload through `get_or_load`, and prints the resulting statistics.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   Workload   │───▶│  SmartCache  │───▶│    Loader    │
//! │  (requests)  │    │ hot/warm/cold│    │  (simulated) │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!                            │
//!                            ▼
//!                   stats JSON / Prometheus
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::FnSource;
use tiercache::{CacheConfig, MemoryPressureLevel, PrometheusExporter, SetOptions, SmartCache};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered cache workload driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML cache configuration (defaults to hot/warm/cold)
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of reads to issue
    #[arg(long, default_value = "10000")]
    requests: u64,

    /// Number of distinct keys
    #[arg(long, default_value = "1000")]
    key_space: u64,

    /// Read keys in order (exercises suffix prediction) instead of a skewed mix
    #[arg(long)]
    sequential: bool,

    /// Simulated loader latency in microseconds
    #[arg(long, default_value = "200")]
    load_latency_us: u64,

    /// Memory pressure to signal after the workload (low, medium, high)
    #[arg(long, value_parser = parse_pressure)]
    pressure: Option<MemoryPressureLevel>,

    /// Also print Prometheus metrics
    #[arg(long)]
    metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn parse_pressure(s: &str) -> std::result::Result<MemoryPressureLevel, String> {
    s.parse().map_err(|e: tiercache::Error| e.to_string())
}

/// Value stored by the workload
#[derive(Debug, Clone, Serialize)]
struct Record {
    id: String,
    payload: String,
}

async fn load_record(key: String, latency: Duration) -> tiercache::Result<Record> {
    tokio::time::sleep(latency).await;
    Ok(Record {
        payload: format!("payload for {}", key),
        id: key,
    })
}

/// Key for the i-th request; 80% of skewed reads go to a fifth of the keys
fn key_for(i: u64, key_space: u64, sequential: bool) -> String {
    let key_space = key_space.max(1);
    if sequential {
        return format!("item{}", i % key_space);
    }
    let mixed = i.wrapping_mul(2_654_435_761) >> 7;
    let n = if i % 5 == 0 {
        mixed % key_space
    } else {
        mixed % (key_space / 5).max(1)
    };
    format!("item{}", n)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading cache config from {}", path.display()))?,
        None => CacheConfig::default(),
    };

    info!("Starting tiercache workload");
    info!("  Tiers: {:?}", config.tiers.iter().map(|t| &t.name).collect::<Vec<_>>());
    info!("  Requests: {}", args.requests);
    info!("  Key space: {}", args.key_space);
    info!("  Sequential: {}", args.sequential);

    let prefetch_delay = config.prediction.prefetch_delay;
    let cache: SmartCache<Record> = SmartCache::new(config).context("building cache")?;
    cache.start();

    let latency = Duration::from_micros(args.load_latency_us);
    cache.set_prefetch_source(Arc::new(FnSource::new(move |key: String| async move {
        load_record(key, latency).await.map(Some)
    })));

    for i in 0..args.requests {
        let key = key_for(i, args.key_space, args.sequential);
        let loader_key = key.clone();
        cache
            .get_or_load_with(&key, SetOptions::new(), || load_record(loader_key, latency))
            .await
            .with_context(|| format!("loading {}", key))?;
    }

    // Let queued prefetches land before reporting
    tokio::time::sleep(prefetch_delay * 2).await;

    if let Some(level) = args.pressure {
        cache.handle_memory_pressure(level);
    }

    let stats = cache.stats();
    println!("{}", stats.to_json()?);

    if args.metrics {
        let exporter = PrometheusExporter::new()?;
        exporter.update(&stats);
        print!("{}", exporter.render()?);
    }

    info!(hit_rate = stats.overall.hit_rate, "Workload complete");
    cache.destroy();
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout carries only the report
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
