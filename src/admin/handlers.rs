use std::num::NonZeroU32;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::load_balancer::LoadBalancerSnapshot;
use crate::registry::{RegistryError, ServiceInstances};
use crate::resilience::{BreakerSnapshot, CircuitState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub services: usize,
    pub instances: usize,
    pub healthy_instances: usize,
    pub open_circuits: usize,
}

#[derive(Debug, Deserialize)]
pub struct WeightUpdate {
    pub weight: u32,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("weight must be >= 1")]
    InvalidWeight,

    #[error("no weight override for instance '{0}'")]
    NoOverride(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminError::Registry(_) | AdminError::NoOverride(_) => StatusCode::NOT_FOUND,
            AdminError::InvalidWeight => StatusCode::BAD_REQUEST,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let services = state.registry.snapshot();
    let instances = services.iter().map(|s| s.instances.len()).sum();
    let healthy_instances = services
        .iter()
        .flat_map(|s| s.instances.iter())
        .filter(|i| i.healthy)
        .count();
    let open_circuits = state
        .breakers
        .snapshot()
        .iter()
        .filter(|b| b.state != CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        services: services.len(),
        instances,
        healthy_instances,
        open_circuits,
    })
}

/// Circuit breaker statistics per service.
pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.breakers.snapshot())
}

pub async fn get_instances(State(state): State<AdminState>) -> Json<Vec<ServiceInstances>> {
    Json(state.registry.snapshot())
}

pub async fn get_balancer(State(state): State<AdminState>) -> Json<LoadBalancerSnapshot> {
    Json(state.balancer.snapshot())
}

pub async fn put_weight(
    State(state): State<AdminState>,
    Path((service, instance)): Path<(String, String)>,
    Json(update): Json<WeightUpdate>,
) -> Result<StatusCode, AdminError> {
    state.registry.instance(&service, &instance)?;
    let weight = NonZeroU32::new(update.weight).ok_or(AdminError::InvalidWeight)?;

    state.balancer.set_weight(&service, &instance, weight);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_weight(
    State(state): State<AdminState>,
    Path((service, instance)): Path<(String, String)>,
) -> Result<StatusCode, AdminError> {
    state.registry.instance(&service, &instance)?;
    if !state.balancer.clear_weight(&service, &instance) {
        return Err(AdminError::NoOverride(instance));
    }
    Ok(StatusCode::NO_CONTENT)
}
