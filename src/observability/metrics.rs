//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_instance_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_instance_active_connections` (gauge): in-flight calls per instance
//! - `gateway_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_circuit_rejections_total` (counter): fail-fast rejections
//! - `gateway_health_probe_duration_seconds` (histogram): probe latency

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use tokio::time::Instant;

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must run inside a Tokio runtime; call once at startup.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Suffix("_duration_seconds".to_string()), LATENCY_BUCKETS)?
        .install()?;

    describe_counter!("gateway_requests_total", Unit::Count, "Requests handled by the gateway");
    describe_histogram!(
        "gateway_request_duration_seconds",
        Unit::Seconds,
        "Request duration from the gateway's perspective"
    );
    describe_gauge!("gateway_instance_healthy", "Instance health (1=healthy, 0=unhealthy)");
    describe_gauge!(
        "gateway_instance_active_connections",
        Unit::Count,
        "In-flight calls per instance"
    );
    describe_gauge!("gateway_circuit_state", "Breaker state (0=closed, 1=open, 2=half-open)");
    describe_counter!(
        "gateway_circuit_rejections_total",
        Unit::Count,
        "Calls rejected by an open breaker"
    );
    describe_histogram!(
        "gateway_health_probe_duration_seconds",
        Unit::Seconds,
        "Health probe duration"
    );

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(service: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_instance_health(service: &str, instance: &str, healthy: bool) {
    gauge!(
        "gateway_instance_healthy",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_active_connections(service: &str, instance: &str, count: usize) {
    gauge!(
        "gateway_instance_active_connections",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(count as f64);
}

pub fn record_circuit_state(service: &str, state: u8) {
    gauge!("gateway_circuit_state", "service" => service.to_string()).set(f64::from(state));
}

pub fn record_circuit_rejection(service: &str) {
    counter!("gateway_circuit_rejections_total", "service" => service.to_string()).increment(1);
}

pub fn record_probe(service: &str, duration: Duration) {
    histogram!("gateway_health_probe_duration_seconds", "service" => service.to_string())
        .record(duration.as_secs_f64());
}
