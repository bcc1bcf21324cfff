//! Service gateway: request-dispatch core of an API gateway.
//!
//! Per inbound request the core resolves the logical service, consults its
//! circuit breaker, picks a healthy instance through the load balancer and
//! hands the call to an upstream, recording the outcome afterwards.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;

pub use config::GatewayConfig;
pub use dispatch::{Dispatcher, HttpUpstream, Upstream, UpstreamError};
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
