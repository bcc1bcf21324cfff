//! Admin API.
//!
//! Read-only views over the dispatch core plus runtime weight overrides.
//! Served on its own listener; every route requires the bearer key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};

use crate::load_balancer::LoadBalancer;
use crate::registry::Registry;
use crate::resilience::CircuitBreakers;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub balancer: Arc<LoadBalancer>,
    pub breakers: Arc<CircuitBreakers>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/instances", get(get_instances))
        .route("/admin/balancer", get(get_balancer))
        .route(
            "/admin/balancer/{service}/weights/{instance}",
            put(put_weight).delete(delete_weight),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
