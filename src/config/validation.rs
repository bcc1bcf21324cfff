//! Configuration validation.
//!
//! Serde handles syntax; this module checks meaning. Every problem is
//! collected so an operator sees the whole list in one pass.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{merge_services, CircuitBreakerConfig, GatewayConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }

    let health = &config.health_check;
    if health.timeout_secs == 0 {
        errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
    }
    if health.timeout_secs >= health.interval_secs {
        errors.push(ValidationError::new(
            "health_check.timeout_secs",
            format!(
                "must be shorter than interval_secs ({} >= {})",
                health.timeout_secs, health.interval_secs
            ),
        ));
    }

    check_breaker(&mut errors, "circuit_breaker", &config.circuit_breaker);

    for (index, service) in config.services.iter().enumerate() {
        let prefix = format!("services[{}]", index);
        if service.id.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.id", prefix), "must not be empty"));
        }
        if !service.health_endpoint.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{}.health_endpoint", prefix),
                "must start with '/'",
            ));
        }
        for pattern in &service.patterns {
            if !pattern.starts_with('/') {
                errors.push(ValidationError::new(
                    format!("{}.patterns", prefix),
                    format!("'{}' must start with '/'", pattern),
                ));
            }
        }
        if service.timeout_secs == Some(0) {
            errors.push(ValidationError::new(format!("{}.timeout_secs", prefix), "must be > 0"));
        }
        if let Some(breaker) = &service.circuit_breaker {
            check_breaker(&mut errors, &format!("{}.circuit_breaker", prefix), breaker);
        }
        for instance in service.expand_instances() {
            check_url(&mut errors, &format!("{}.url", prefix), &instance.url);
            if instance.weight == 0 {
                errors.push(ValidationError::new(
                    format!("{}.weight", prefix),
                    format!("instance '{}' weight must be >= 1", instance.url),
                ));
            }
        }
    }

    for merged in merge_services(&config.services) {
        let mut seen = HashSet::new();
        for instance in &merged.instances {
            if instance.id.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("services.{}", merged.config.id),
                    "instance id must not be empty",
                ));
            } else if !seen.insert(instance.id.as_str()) {
                errors.push(ValidationError::new(
                    format!("services.{}", merged.config.id),
                    format!("duplicate instance id '{}'", instance.id),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a socket address", value),
        ));
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
        Ok(_) => errors.push(ValidationError::new(
            field,
            format!("'{}' must be an http(s) URL with a host", value),
        )),
        Err(e) => errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid URL: {}", value, e),
        )),
    }
}

fn check_breaker(errors: &mut Vec<ValidationError>, prefix: &str, breaker: &CircuitBreakerConfig) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", prefix),
            "must be >= 1",
        ));
    }
    if !(breaker.error_threshold_percentage > 0.0 && breaker.error_threshold_percentage <= 100.0) {
        errors.push(ValidationError::new(
            format!("{}.error_threshold_percentage", prefix),
            "must be in (0, 100]",
        ));
    }
    if breaker.rolling_buckets == 0 {
        errors.push(ValidationError::new(
            format!("{}.rolling_buckets", prefix),
            "must be >= 1",
        ));
    }
    if breaker.rolling_window_secs == 0 {
        errors.push(ValidationError::new(
            format!("{}.rolling_window_secs", prefix),
            "must be > 0",
        ));
    }
    if !(breaker.latency_smoothing > 0.0 && breaker.latency_smoothing <= 1.0) {
        errors.push(ValidationError::new(
            format!("{}.latency_smoothing", prefix),
            "must be in (0, 1]",
        ));
    }
}
