//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (request id, tracing, concurrency and body limits)
//! - Resolve the target service and hand the request to the dispatcher
//! - Serve until the shutdown signal fires

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::{ListenerConfig, TimeoutConfig};
use crate::dispatch::{Dispatcher, HttpUpstream};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::strip_hop_by_hop;
use crate::observability::metrics;
use crate::resilience::timeouts;
use crate::routing::Router as ServiceRouter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ServiceRouter>,
    pub dispatcher: Arc<Dispatcher<HttpUpstream>>,
    pub timeouts: TimeoutConfig,
}

/// Public HTTP entry point of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(listener: &ListenerConfig, state: AppState) -> Self {
        let router = Self::build_router(listener, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(listener: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(listener.max_body_size))
            .layer(ConcurrencyLimitLayer::new(listener.max_connections))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server on `listener` until shutdown is signalled.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve the service for the path and dispatch.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let path = request.uri().path().to_string();

    let Some(service_id) = state.router.resolve(&path).map(|m| m.service_id.to_string()) else {
        tracing::debug!(request_id = %request_id, path = %path, "No route matched");
        metrics::record_request("none", StatusCode::NOT_FOUND.as_u16(), start);
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no_route",
                "message": format!("no service is routed for '{}'", path),
            })),
        )
            .into_response();
    };

    let timeout = match state.dispatcher.registry().service(&service_id) {
        Ok(service) => timeouts::request_timeout(&state.timeouts, service),
        Err(_) => std::time::Duration::from_secs(state.timeouts.request_secs),
    };

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %path,
        service = %service_id,
        "Proxying request"
    );

    match state
        .dispatcher
        .dispatch(&service_id, request, timeouts::deadline_after(timeout))
        .await
    {
        Ok(mut response) => {
            strip_hop_by_hop(response.headers_mut());
            metrics::record_request(&service_id, response.status().as_u16(), start);
            response
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::warn!(
                    request_id = %request_id,
                    service = %service_id,
                    kind = e.kind(),
                    error = %e,
                    "Dispatch failed"
                );
            } else {
                tracing::debug!(request_id = %request_id, service = %service_id, error = %e, "Dispatch rejected");
            }
            metrics::record_request(&service_id, status.as_u16(), start);
            e.into_response()
        }
    }
}
