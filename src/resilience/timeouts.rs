//! Deadline computation.
//!
//! # Responsibilities
//! - Pick the request timeout for a service (override or global default)
//! - Turn it into an absolute deadline at the edge
//!
//! # Design Decisions
//! - Deadlines are absolute `tokio::time::Instant`s so the whole call,
//!   connect included, shares one budget
//! - An expired deadline is an upstream timeout (504), never a 502

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{ServiceConfig, TimeoutConfig};

/// Timeout for calls to `service`: its own `timeout_secs` or the global default.
pub fn request_timeout(defaults: &TimeoutConfig, service: &ServiceConfig) -> Duration {
    Duration::from_secs(service.timeout_secs.unwrap_or(defaults.request_secs))
}

/// Absolute deadline for a call starting now.
pub fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout
}
