//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancer::Strategy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, concurrency limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Default load balancing strategy.
    pub load_balancer: LoadBalancerConfig,

    /// Default circuit breaker policy.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin (stats) surface settings.
    pub admin: AdminConfig,

    /// Logical service registrations.
    pub services: Vec<ServiceConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// A logical backend service and the instances behind it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service identifier used by the router.
    pub id: String,

    /// Human readable name.
    #[serde(default)]
    pub name: String,

    /// Address of the primary instance (e.g., "http://10.0.0.1:3000").
    pub base_url: String,

    /// Path probed by the health monitor.
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,

    /// URL patterns routed to this service.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Fixed headers added to every forwarded request.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    /// Weight of the `base_url` instance.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Load balancing strategy override.
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// Per-request deadline override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Circuit breaker override.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Additional instances of the same logical service.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl ServiceConfig {
    /// Minimal registration with one instance at `base_url`.
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: base_url.into(),
            health_endpoint: default_health_endpoint(),
            patterns: Vec::new(),
            headers: None,
            weight: default_weight(),
            strategy: None,
            timeout_secs: None,
            circuit_breaker: None,
            instances: Vec::new(),
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Expand this record into its instance list.
    ///
    /// The `base_url` instance comes first unless an explicit instance already
    /// points at the same URL.
    pub fn expand_instances(&self) -> Vec<InstanceConfig> {
        let mut expanded = Vec::with_capacity(self.instances.len() + 1);
        if !self.instances.iter().any(|i| i.url == self.base_url) {
            expanded.push(InstanceConfig {
                id: None,
                url: self.base_url.clone(),
                weight: self.weight,
            });
        }
        expanded.extend(self.instances.iter().cloned());
        expanded
    }
}

/// One additional instance of a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Instance identifier (default: "<service-id>-<n>").
    #[serde(default)]
    pub id: Option<String>,

    /// Instance address.
    pub url: String,

    /// Weight for weighted round-robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// A service with every record sharing its id folded in.
#[derive(Debug, Clone)]
pub struct MergedService {
    /// The first record seen for this id.
    pub config: ServiceConfig,
    /// Instances from all records, in file order.
    pub instances: Vec<ResolvedInstance>,
}

/// An instance with its final identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    pub id: String,
    pub url: String,
    pub weight: u32,
}

/// Group service records by id, preserving first-seen order.
///
/// Instances without an explicit id are named `<service-id>-<n>` where `n` is
/// their position in the merged list.
pub fn merge_services(records: &[ServiceConfig]) -> Vec<MergedService> {
    let mut merged: Vec<MergedService> = Vec::new();
    for record in records {
        let position = match merged.iter().position(|m| m.config.id == record.id) {
            Some(position) => position,
            None => {
                merged.push(MergedService {
                    config: record.clone(),
                    instances: Vec::new(),
                });
                merged.len() - 1
            }
        };
        let entry = &mut merged[position];
        for instance in record.expand_instances() {
            let n = entry.instances.len();
            entry.instances.push(ResolvedInstance {
                id: instance.id.unwrap_or_else(|| format!("{}-{}", record.id, n)),
                url: instance.url,
                weight: instance.weight,
            });
        }
    }
    merged
}

fn default_weight() -> u32 {
    1
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds (must be shorter than the interval).
    pub timeout_secs: u64,

    /// Health state of an instance before its first probe.
    pub initial_healthy: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            initial_healthy: true,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Default request deadline (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Strategy used by services without an override.
    pub strategy: Strategy,
}

/// When a closed breaker trips open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPolicy {
    /// `failure_threshold` consecutive failures.
    #[default]
    Consecutive,
    /// Failure percentage over the rolling window.
    ErrorRate,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Trip policy.
    pub policy: TripPolicy,

    /// Consecutive failures that open the breaker (consecutive policy).
    pub failure_threshold: u32,

    /// Failure percentage that opens the breaker (error_rate policy).
    pub error_threshold_percentage: f64,

    /// Minimum calls in the window before error_rate can trip.
    pub volume_threshold: u32,

    /// Length of the rolling statistics window in seconds.
    pub rolling_window_secs: u64,

    /// Number of buckets the rolling window is split into.
    pub rolling_buckets: u32,

    /// Cooldown before an open breaker admits a trial call, in seconds.
    pub reset_timeout_secs: u64,

    /// Smoothing factor of the latency moving average (0 < alpha <= 1).
    pub latency_smoothing: f64,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_secs(self.rolling_window_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            policy: TripPolicy::Consecutive,
            failure_threshold: 5,
            error_threshold_percentage: 50.0,
            volume_threshold: 10,
            rolling_window_secs: 10,
            rolling_buckets: 10,
            reset_timeout_secs: 30,
            latency_smoothing: 0.2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[services]]
            id = "payments"
            base_url = "http://127.0.0.1:3000"
            "#,
        )
        .unwrap();

        assert_eq!(config.services.len(), 1);
        let service = &config.services[0];
        assert_eq!(service.health_endpoint, "/health");
        assert_eq!(service.weight, 1);
        assert_eq!(service.display_name(), "payments");
        assert_eq!(config.health_check.interval_secs, 30);
        assert_eq!(config.health_check.timeout_secs, 5);
        assert_eq!(config.circuit_breaker.reset_timeout_secs, 30);
        assert_eq!(config.load_balancer.strategy, Strategy::RoundRobin);
    }

    #[test]
    fn test_full_service_record() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [load_balancer]
            strategy = "least-connections"

            [circuit_breaker]
            policy = "error_rate"
            error_threshold_percentage = 25.0

            [[services]]
            id = "payments"
            name = "Payments"
            base_url = "http://10.0.0.1:3000"
            patterns = ["/api/payments/*"]
            headers = { "x-gateway" = "core" }
            strategy = "weighted_round_robin"
            timeout_secs = 10
            instances = [{ id = "payments-b", url = "http://10.0.0.2:3000", weight = 3 }]
            "#,
        )
        .unwrap();

        assert_eq!(config.load_balancer.strategy, Strategy::LeastConnections);
        assert_eq!(config.circuit_breaker.policy, TripPolicy::ErrorRate);

        let service = &config.services[0];
        assert_eq!(service.strategy, Some(Strategy::WeightedRoundRobin));
        assert_eq!(
            service.headers.as_ref().and_then(|h| h.get("x-gateway")).map(String::as_str),
            Some("core")
        );

        let instances = service.expand_instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].url, "http://10.0.0.1:3000");
        assert_eq!(instances[1].id.as_deref(), Some("payments-b"));
        assert_eq!(instances[1].weight, 3);
    }

    #[test]
    fn test_merge_services_by_id() {
        let mut first = ServiceConfig::new("payments", "http://10.0.0.1:3000");
        first.patterns.push("/api/payments/*".into());
        let mut second = ServiceConfig::new("payments", "http://10.0.0.2:3000");
        second.patterns.push("/ignored/*".into());
        let other = ServiceConfig::new("users", "http://10.0.1.1:3000");

        let merged = merge_services(&[first, other, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].config.id, "payments");
        assert_eq!(merged[0].config.patterns, vec!["/api/payments/*"]);

        let ids: Vec<_> = merged[0].instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["payments-0", "payments-1"]);
        assert_eq!(merged[0].instances[1].url, "http://10.0.0.2:3000");
        assert_eq!(merged[1].instances[0].id, "users-0");
    }

    #[test]
    fn test_expand_skips_duplicate_base_url() {
        let mut service = ServiceConfig::new("orders", "http://10.0.0.5:80");
        service.instances.push(InstanceConfig {
            id: Some("orders-main".into()),
            url: "http://10.0.0.5:80".into(),
            weight: 2,
        });

        let instances = service.expand_instances();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id.as_deref(), Some("orders-main"));
    }
}
