// src/metrics.rs
use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
/// Must be called from inside the Tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install exporter")?;
    crate::ingest::ensure_metrics_described();
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(())
}
