//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): forwarded cycles by method, status
//! - `proxy_request_duration_seconds` (histogram): cycle latency by method
//! - `proxy_tunnels_total` (counter): CONNECT sessions by outcome
//! - `proxy_active_tunnels` (gauge): tunnels currently relaying
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - Prometheus exporter is opt-in for a local debugging tool

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished HTTP cycle.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record the outcome of a CONNECT request.
pub fn record_tunnel(outcome: &'static str) {
    metrics::counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

/// Keeps `proxy_active_tunnels` accurate for the lifetime of a relay.
pub struct ActiveTunnel(());

impl ActiveTunnel {
    pub fn start() -> Self {
        metrics::gauge!("proxy_active_tunnels").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveTunnel {
    fn drop(&mut self) {
        metrics::gauge!("proxy_active_tunnels").decrement(1.0);
    }
}
