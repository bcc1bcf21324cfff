//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the dispatch core from a validated configuration
//! - Start background tasks (health loops, admin API)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::loader::ConfigError;
use crate::config::validation::validate_config;
use crate::config::{GatewayConfig, ServiceConfig};
use crate::dispatch::{Dispatcher, HttpUpstream};
use crate::health::HealthMonitor;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::registry::Registry;
use crate::resilience::CircuitBreakers;
use crate::routing::Router as ServiceRouter;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// The assembled gateway: shared core state plus the HTTP front.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    registry: Arc<Registry>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakers>,
    dispatcher: Arc<Dispatcher<HttpUpstream>>,
    router: Arc<ServiceRouter>,
    started_at: std::time::Instant,
}

impl Gateway {
    /// Validate `config` and build every core component.
    pub fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let registry = Arc::new(Registry::from_config(
            &config.services,
            config.health_check.initial_healthy,
        ));
        let balancer = Arc::new(LoadBalancer::from_config(&config));
        let breakers = Arc::new(CircuitBreakers::from_config(&config));

        // Route on the merged records so a repeated service id keeps the
        // patterns of its first record.
        let merged: Vec<ServiceConfig> = registry
            .service_ids()
            .filter_map(|id| registry.service(id).ok())
            .map(|service| (**service).clone())
            .collect();
        let router = Arc::new(ServiceRouter::from_services(&merged));

        let upstream = HttpUpstream::new(std::time::Duration::from_secs(config.timeouts.connect_secs));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&balancer),
            Arc::clone(&breakers),
            upstream,
        ));

        let instances: usize = registry
            .service_ids()
            .filter_map(|id| registry.instances(id).ok())
            .map(|i| i.len())
            .sum();
        tracing::info!(
            services = merged.len(),
            instances,
            strategy = %config.load_balancer.strategy,
            request_timeout_secs = config.timeouts.request_secs,
            "Gateway core initialized"
        );
        if router.is_empty() {
            tracing::warn!("No routing patterns configured, every request will be answered with 404");
        }

        Ok(Self {
            config: Arc::new(config),
            registry,
            balancer,
            breakers,
            dispatcher,
            router,
            started_at: std::time::Instant::now(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<HttpUpstream>> {
        &self.dispatcher
    }

    fn app_state(&self) -> AppState {
        AppState {
            router: Arc::clone(&self.router),
            dispatcher: Arc::clone(&self.dispatcher),
            timeouts: self.config.timeouts.clone(),
        }
    }

    fn admin_state(&self) -> AdminState {
        AdminState {
            registry: Arc::clone(&self.registry),
            balancer: Arc::clone(&self.balancer),
            breakers: Arc::clone(&self.breakers),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            started_at: self.started_at,
        }
    }

    /// Bind the configured listeners and serve until `shutdown` fires.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let listener = bind(&self.config.listener.bind_address).await?;
        let admin_listener = if self.config.admin.enabled {
            Some(bind(&self.config.admin.bind_address).await?)
        } else {
            None
        };
        self.serve(listener, admin_listener, shutdown).await
    }

    /// Serve on already-bound listeners until `shutdown` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        admin_listener: Option<TcpListener>,
        shutdown: Shutdown,
    ) -> Result<(), StartupError> {
        let health_tasks =
            HealthMonitor::new(Arc::clone(&self.registry), self.config.health_check.clone())
                .spawn(&shutdown);

        let admin_task = admin_listener.map(|admin_listener| {
            let app = setup_admin_router(self.admin_state());
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                if let Ok(addr) = admin_listener.local_addr() {
                    tracing::info!(address = %addr, "Admin API listening");
                }
                let result = axum::serve(admin_listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            })
        });

        let server = HttpServer::new(&self.config.listener, self.app_state());
        let result = server.run(listener, shutdown.subscribe()).await;

        // The public server may also stop on its own; release everything else.
        shutdown.trigger();
        for task in health_tasks {
            let _ = task.await;
        }
        if let Some(task) = admin_task {
            let _ = task.await;
        }

        tracing::info!("Gateway stopped");
        result.map_err(StartupError::from)
    }
}

async fn bind(addr: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })
}
