//! Monitoring module
//!
//! Exposes cache statistics in the Prometheus text format.

mod exporter;

pub use exporter::PrometheusExporter;
