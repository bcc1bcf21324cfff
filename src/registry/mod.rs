//! Service registry.
//!
//! # Data Flow
//! ```text
//! GatewayConfig.services
//!     → merge records by id, expand instances
//!     → Registry (immutable topology, mutable per-instance fields)
//!
//! Writers:
//!     health monitor  → set_health (healthy flag, last probe)
//!     dispatcher      → adjust_active_connections (+1 / -1)
//! Readers:
//!     dispatcher, load balancer, admin API
//! ```
//!
//! # Design Decisions
//! - The service set is fixed after startup, so lookups need no lock
//! - Instance order is the configuration order and never changes
//! - Mutable fields are atomics owned by a single writer each

pub mod instance;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::{merge_services, ServiceConfig};
use crate::health::state::HealthCheckResult;
use crate::observability::metrics;

pub use instance::{Instance, InstanceSnapshot};

/// Lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("unknown instance '{instance}' for service '{service}'")]
    UnknownInstance { service: String, instance: String },
}

#[derive(Debug)]
struct ServiceEntry {
    config: Arc<ServiceConfig>,
    instances: Vec<Arc<Instance>>,
}

/// Registered services and their instances.
#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, ServiceEntry>,
    /// Service ids in registration order.
    order: Vec<String>,
}

impl Registry {
    /// Build the registry from service records.
    ///
    /// Instances whose URL does not parse are skipped with a warning.
    pub fn from_config(records: &[ServiceConfig], initial_healthy: bool) -> Self {
        let mut registry = Self::default();

        for merged in merge_services(records) {
            let service_id = merged.config.id.clone();
            let mut instances = Vec::with_capacity(merged.instances.len());
            for resolved in merged.instances {
                match Url::parse(&resolved.url) {
                    Ok(url) => instances.push(Arc::new(Instance::new(
                        resolved.id,
                        service_id.clone(),
                        url,
                        resolved.weight,
                        initial_healthy,
                    ))),
                    Err(e) => {
                        tracing::warn!(
                            service = %service_id,
                            url = %resolved.url,
                            error = %e,
                            "Invalid instance address, skipping"
                        );
                    }
                }
            }

            tracing::debug!(
                service = %service_id,
                instances = instances.len(),
                "Service registered"
            );
            registry.order.push(service_id.clone());
            registry.services.insert(
                service_id,
                ServiceEntry {
                    config: Arc::new(merged.config),
                    instances,
                },
            );
        }

        registry
    }

    fn entry(&self, service_id: &str) -> Result<&ServiceEntry, RegistryError> {
        self.services
            .get(service_id)
            .ok_or_else(|| RegistryError::UnknownService(service_id.to_string()))
    }

    /// Configuration of a registered service.
    pub fn service(&self, service_id: &str) -> Result<&Arc<ServiceConfig>, RegistryError> {
        self.entry(service_id).map(|e| &e.config)
    }

    /// Registered service ids, in registration order.
    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// All instances of a service, in insertion order.
    pub fn instances(&self, service_id: &str) -> Result<&[Arc<Instance>], RegistryError> {
        self.entry(service_id).map(|e| e.instances.as_slice())
    }

    /// The healthy subsequence of [`instances`](Self::instances).
    pub fn healthy(&self, service_id: &str) -> Result<Vec<Arc<Instance>>, RegistryError> {
        Ok(self
            .instances(service_id)?
            .iter()
            .filter(|i| i.is_healthy())
            .cloned()
            .collect())
    }

    /// Look up one instance of a service.
    pub fn instance(&self, service_id: &str, instance_id: &str) -> Result<&Arc<Instance>, RegistryError> {
        self.instances(service_id)?
            .iter()
            .find(|i| i.id() == instance_id)
            .ok_or_else(|| RegistryError::UnknownInstance {
                service: service_id.to_string(),
                instance: instance_id.to_string(),
            })
    }

    /// Record a probe result on one instance.
    pub fn set_health(
        &self,
        service_id: &str,
        instance_id: &str,
        result: HealthCheckResult,
    ) -> Result<(), RegistryError> {
        let instance = self.instance(service_id, instance_id)?;
        let healthy = result.healthy;
        let error = result.error.clone();

        if instance.apply_health(result) {
            if healthy {
                tracing::info!(service = %service_id, instance = %instance_id, "Instance recovered");
            } else {
                tracing::warn!(
                    service = %service_id,
                    instance = %instance_id,
                    error = error.as_deref().unwrap_or("unknown"),
                    "Instance marked unhealthy"
                );
            }
        }
        metrics::record_instance_health(service_id, instance_id, healthy);
        Ok(())
    }

    /// Add `delta` to an instance's in-flight count and return the new value.
    ///
    /// The count never drops below zero; an attempt to do so is clamped and logged.
    pub fn adjust_active_connections(
        &self,
        service_id: &str,
        instance_id: &str,
        delta: isize,
    ) -> Result<usize, RegistryError> {
        let instance = self.instance(service_id, instance_id)?;
        let (count, clamped) = instance.adjust_connections(delta);
        if clamped {
            tracing::warn!(
                service = %service_id,
                instance = %instance_id,
                delta,
                "Active connection count would go negative, clamped to zero"
            );
        }
        metrics::record_active_connections(service_id, instance_id, count);
        Ok(count)
    }

    /// Point-in-time view of every service's instances.
    pub fn snapshot(&self) -> Vec<ServiceInstances> {
        self.order
            .iter()
            .filter_map(|id| self.services.get(id))
            .map(|entry| ServiceInstances {
                service: entry.config.id.clone(),
                name: entry.config.display_name().to_string(),
                instances: entry.instances.iter().map(|i| i.snapshot()).collect(),
            })
            .collect()
    }
}

/// Serializable instances of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInstances {
    pub service: String,
    pub name: String,
    pub instances: Vec<InstanceSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use std::time::Duration;

    fn payments() -> ServiceConfig {
        let mut service = ServiceConfig::new("payments", "http://127.0.0.1:3000");
        service.instances.push(InstanceConfig {
            id: None,
            url: "http://127.0.0.1:3001".into(),
            weight: 2,
        });
        service.instances.push(InstanceConfig {
            id: Some("payments-c".into()),
            url: "http://127.0.0.1:3002".into(),
            weight: 1,
        });
        service
    }

    #[test]
    fn test_instances_keep_insertion_order() {
        let registry = Registry::from_config(&[payments()], true);
        let ids: Vec<_> = registry
            .instances("payments")
            .unwrap()
            .iter()
            .map(|i| i.id().to_string())
            .collect();
        assert_eq!(ids, vec!["payments-0", "payments-1", "payments-c"]);
        assert_eq!(registry.instance("payments", "payments-1").unwrap().weight(), 2);
    }

    #[test]
    fn test_healthy_subsequence() {
        let registry = Registry::from_config(&[payments()], true);
        registry
            .set_health(
                "payments",
                "payments-1",
                HealthCheckResult::failure(Some(500), "status 500", Duration::ZERO),
            )
            .unwrap();

        let healthy: Vec<_> = registry
            .healthy("payments")
            .unwrap()
            .iter()
            .map(|i| i.id().to_string())
            .collect();
        assert_eq!(healthy, vec!["payments-0", "payments-c"]);
    }

    #[test]
    fn test_initially_unhealthy() {
        let registry = Registry::from_config(&[payments()], false);
        assert!(registry.healthy("payments").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = Registry::from_config(&[payments()], true);
        assert_eq!(
            registry.healthy("ghost").unwrap_err(),
            RegistryError::UnknownService("ghost".into())
        );
        assert!(matches!(
            registry.adjust_active_connections("payments", "nope", 1),
            Err(RegistryError::UnknownInstance { .. })
        ));
        assert!(registry
            .set_health("ghost", "x", HealthCheckResult::success(200, Duration::ZERO))
            .is_err());
    }

    #[test]
    fn test_adjust_active_connections_never_negative() {
        let registry = Registry::from_config(&[payments()], true);
        assert_eq!(registry.adjust_active_connections("payments", "payments-0", 1).unwrap(), 1);
        assert_eq!(registry.adjust_active_connections("payments", "payments-0", -1).unwrap(), 0);
        assert_eq!(registry.adjust_active_connections("payments", "payments-0", -1).unwrap(), 0);
    }

    #[test]
    fn test_invalid_url_skipped() {
        let broken = ServiceConfig::new("broken", "::not a url::");
        let registry = Registry::from_config(&[broken], true);
        assert!(registry.instances("broken").unwrap().is_empty());
        assert_eq!(registry.service_ids().collect::<Vec<_>>(), vec!["broken"]);
    }

    #[test]
    fn test_snapshot() {
        let registry = Registry::from_config(&[payments()], true);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].instances.len(), 3);
        assert_eq!(snapshot[0].instances[1].weight, 2);
    }
}
