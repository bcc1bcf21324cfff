//! Gateway error taxonomy.
//!
//! Every failure the dispatch core can hand back to a caller is a
//! [`GatewayError`]. Each kind maps to one stable HTTP status code so the
//! routing layer never has to interpret error text.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::registry::RegistryError;

/// Errors surfaced by [`Dispatcher::dispatch`](crate::dispatch::Dispatcher::dispatch).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The logical service is not registered.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// Every known instance of the service is currently unhealthy.
    #[error("no healthy instances for service '{0}'")]
    NoHealthyInstances(String),

    /// The service's circuit breaker is rejecting calls.
    #[error("circuit open for service '{service}'")]
    CircuitOpen {
        service: String,
        /// Time left until the breaker admits a trial call.
        retry_after: Duration,
    },

    /// The selected instance did not answer before the deadline.
    #[error("upstream '{instance}' of service '{service}' timed out")]
    UpstreamTimeout { service: String, instance: String },

    /// The selected instance could not be reached or broke the exchange.
    #[error("upstream '{instance}' of service '{service}' failed: {reason}")]
    UpstreamFailure {
        service: String,
        instance: String,
        reason: String,
    },

    /// Bookkeeping inconsistency inside the gateway.
    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status presented to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownService(_) => StatusCode::NOT_FOUND,
            GatewayError::NoHealthyInstances(_) | GatewayError::CircuitOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used in response bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UnknownService(_) => "unknown_service",
            GatewayError::NoHealthyInstances(_) => "no_healthy_instances",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::UpstreamFailure { .. } => "upstream_failure",
            GatewayError::Internal(_) => "internal",
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownService(service) => GatewayError::UnknownService(service),
            other @ RegistryError::UnknownInstance { .. } => {
                GatewayError::Internal(other.to_string())
            }
        }
    }
}
