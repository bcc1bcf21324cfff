//! Active health checking.
//!
//! # Responsibilities
//! - Run one probe loop per registered service
//! - Probe every instance of the service concurrently on each tick
//! - Write each result into the registry

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::state::HealthCheckResult;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::{Instance, Registry, RegistryError};

pub struct HealthMonitor {
    registry: Arc<Registry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            registry,
            config,
            client,
        }
    }

    /// Start one probe loop per service. Every loop exits on shutdown.
    pub fn spawn(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return Vec::new();
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            "Health monitor starting"
        );

        let monitor = Arc::new(self);
        let service_ids: Vec<String> = monitor.registry.service_ids().map(str::to_string).collect();
        service_ids
            .into_iter()
            .map(|service_id| {
                let monitor = Arc::clone(&monitor);
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move { monitor.run_service(service_id, shutdown).await })
            })
            .collect()
    }

    async fn run_service(&self, service_id: String, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_service(&service_id).await {
                        tracing::error!(service = %service_id, error = %e, "Health loop stopping");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(service = %service_id, "Health loop received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Probe every instance of a service once and record the results.
    ///
    /// Returns the number of instances found healthy.
    pub async fn check_service(&self, service_id: &str) -> Result<usize, RegistryError> {
        let endpoint = self.registry.service(service_id)?.health_endpoint.clone();
        let instances = self.registry.instances(service_id)?;

        let results = join_all(instances.iter().map(|instance| self.probe(instance, &endpoint))).await;

        let mut healthy = 0;
        for (instance, result) in instances.iter().zip(results) {
            metrics::record_probe(service_id, result.response_time);
            if result.healthy {
                healthy += 1;
            }
            self.registry.set_health(service_id, instance.id(), result)?;
        }
        Ok(healthy)
    }

    /// Issue one bounded GET against `base_url + endpoint`.
    pub async fn probe(&self, instance: &Instance, endpoint: &str) -> HealthCheckResult {
        let uri = probe_uri(instance, endpoint);
        let start = Instant::now();

        let request = match Request::builder()
            .method("GET")
            .uri(&uri)
            .header("user-agent", "service-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                return HealthCheckResult::failure(None, format!("invalid probe request: {}", e), start.elapsed());
            }
        };

        match time::timeout(self.config.timeout(), self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    HealthCheckResult::success(status.as_u16(), start.elapsed())
                } else {
                    tracing::debug!(instance = %instance.id(), status = %status, "Health check failed: non-success status");
                    HealthCheckResult::failure(
                        Some(status.as_u16()),
                        format!("status {}", status.as_u16()),
                        start.elapsed(),
                    )
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(instance = %instance.id(), error = %e, "Health check failed: connection error");
                HealthCheckResult::failure(None, format!("connection error: {}", e), start.elapsed())
            }
            Err(_) => {
                tracing::debug!(instance = %instance.id(), "Health check failed: timeout");
                HealthCheckResult::failure(None, "timeout", start.elapsed())
            }
        }
    }
}

fn probe_uri(instance: &Instance, endpoint: &str) -> String {
    format!("{}{}", instance.base_url().as_str().trim_end_matches('/'), endpoint)
}
