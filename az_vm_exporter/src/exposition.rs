//! Text exposition of collected metrics.
//!
//! Each scrape builds a fresh [`Registry`] and encodes it with
//! `prometheus-client`. The OpenMetrics `# EOF` terminator is not written so
//! the exporter's own telemetry can follow in the same body.

use prometheus_client::{encoding::text, registry::Registry};

/// Content type of the scrape response.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Append the metrics of `registry` to `out`.
///
/// # Errors
///
/// Returns an error if a metric fails to encode.
pub fn encode(registry: &Registry, out: &mut String) -> Result<(), std::fmt::Error> {
    text::encode_registry(out, registry)
}
