//! Health probe results.
//!
//! A [`HealthCheckResult`] lives only as long as it takes to apply it to the
//! owning instance; the instance keeps the most recent one for the admin
//! surface.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Outcome of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    pub response_time: Duration,
    pub timestamp: SystemTime,
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// A 2xx answer within the timeout.
    pub fn success(status: u16, response_time: Duration) -> Self {
        Self {
            healthy: true,
            status: Some(status),
            response_time,
            timestamp: SystemTime::now(),
            error: None,
        }
    }

    /// A non-2xx answer, timeout, or connection error.
    pub fn failure(status: Option<u16>, error: impl Into<String>, response_time: Duration) -> Self {
        Self {
            healthy: false,
            status,
            response_time,
            timestamp: SystemTime::now(),
            error: Some(error.into()),
        }
    }

    /// Serializable view with the timestamp as epoch milliseconds.
    pub fn view(&self) -> HealthCheckView {
        HealthCheckView {
            healthy: self.healthy,
            status: self.status,
            response_time_ms: self.response_time.as_millis() as u64,
            timestamp_ms: self
                .timestamp
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            error: self.error.clone(),
        }
    }
}

/// Wire form of a [`HealthCheckResult`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckView {
    pub healthy: bool,
    pub status: Option<u16>,
    pub response_time_ms: u64,
    pub timestamp_ms: u64,
    pub error: Option<String>,
}
