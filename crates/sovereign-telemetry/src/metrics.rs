//! Prometheus text export.
//!
//! Bus metrics register themselves in the default Prometheus registry when
//! the `metrics` feature of `sovereign-bus` is on; this module renders that
//! registry for scraping or logging.

use prometheus::{Encoder, TextEncoder};

use crate::TelemetryError;

/// Encode all metrics of the default registry as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsExport(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsExport(e.to_string()))
}
