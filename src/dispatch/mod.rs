//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! dispatch(service, request, deadline)
//!     → Registry::service           (UnknownService)
//!     → CircuitBreakers::acquire     (CircuitOpen, no health lookup)
//!     → Registry::healthy            (NoHealthyInstances)
//!     → LoadBalancer::select
//!     → InFlight guard: active_connections + 1
//!     → Upstream::forward bounded by the deadline
//!     → InFlight::finish: active_connections - 1, breaker outcome
//! ```
//!
//! # Design Decisions
//! - Bookkeeping lives in a drop guard, so a cancelled dispatch still
//!   releases its connection slot and reports a timeout to the breaker
//! - A permit dropped before an instance is chosen is withdrawn, so
//!   `NoHealthyInstances` never counts as a fired call
//! - A 5xx answer is handed back untouched but counts as a breaker failure
//! - No retries; the caller may dispatch again and get another instance

pub mod upstream;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use tokio::time::{self, Instant};

use crate::error::GatewayError;
use crate::load_balancer::LoadBalancer;
use crate::registry::{Instance, Registry};
use crate::resilience::{CircuitBreakers, Outcome, Permit};

pub use upstream::{HttpUpstream, Upstream, UpstreamError};

/// Per-request orchestration over the shared core state.
pub struct Dispatcher<U> {
    registry: Arc<Registry>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakers>,
    upstream: U,
}

impl<U: Upstream> Dispatcher<U> {
    pub fn new(
        registry: Arc<Registry>,
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakers>,
        upstream: U,
    ) -> Self {
        Self {
            registry,
            balancer,
            breakers,
            upstream,
        }
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

    /// Route one request to an instance of `service_id`.
    ///
    /// The upstream call is abandoned at `deadline` and reported as
    /// [`GatewayError::UpstreamTimeout`].
    pub async fn dispatch(
        &self,
        service_id: &str,
        request: Request<Body>,
        deadline: Instant,
    ) -> Result<Response<Body>, GatewayError> {
        let service = self.registry.service(service_id)?;
        let permit = self.breakers.acquire(service_id)?;

        let healthy = self.registry.healthy(service_id)?;
        let instance = self.balancer.select(service_id, &healthy)?;

        tracing::debug!(
            service = %service_id,
            instance = %instance.id(),
            trial = permit.is_trial(),
            "Dispatching request"
        );

        let call = InFlight::start(&self.registry, Arc::clone(&instance), permit)?;

        match time::timeout_at(deadline, self.upstream.forward(&instance, service, request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let latency = call.elapsed();
                let outcome = if status.is_server_error() {
                    Outcome::failure(latency)
                } else {
                    Outcome::success(latency)
                };
                call.finish(outcome);
                Ok(response)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    service = %service_id,
                    instance = %instance.id(),
                    error = %e,
                    "Upstream call failed"
                );
                let latency = call.elapsed();
                call.finish(Outcome::failure(latency));
                Err(GatewayError::UpstreamFailure {
                    service: service_id.to_string(),
                    instance: instance.id().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    service = %service_id,
                    instance = %instance.id(),
                    "Upstream call timed out"
                );
                let latency = call.elapsed();
                call.finish(Outcome::timeout(latency));
                Err(GatewayError::UpstreamTimeout {
                    service: service_id.to_string(),
                    instance: instance.id().to_string(),
                })
            }
        }
    }
}

/// One call in flight against one instance.
///
/// Dropping it without [`finish`](InFlight::finish) records a timeout.
struct InFlight<'a> {
    registry: &'a Registry,
    instance: Arc<Instance>,
    permit: Option<Permit>,
    started: Instant,
}

impl<'a> InFlight<'a> {
    fn start(
        registry: &'a Registry,
        instance: Arc<Instance>,
        permit: Permit,
    ) -> Result<Self, GatewayError> {
        registry.adjust_active_connections(instance.service_id(), instance.id(), 1)?;
        Ok(Self {
            registry,
            instance,
            permit: Some(permit),
            started: Instant::now(),
        })
    }

    fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    fn finish(mut self, outcome: Outcome) {
        if let Some(permit) = self.permit.take() {
            permit.record(outcome);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            tracing::debug!(
                service = %self.instance.service_id(),
                instance = %self.instance.id(),
                "Dispatch cancelled mid-call"
            );
            permit.record(Outcome::timeout(self.started.elapsed()));
        }
        if let Err(e) =
            self.registry
                .adjust_active_connections(self.instance.service_id(), self.instance.id(), -1)
        {
            tracing::error!(error = %e, "Failed to release connection slot");
        }
    }
}
