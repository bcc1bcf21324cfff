//! Instance abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint of a logical service
//! - Track active connections (for least-connections selection)
//! - Track health state (healthy flag + last probe result)
//!
//! Each field has a single writer: the health monitor owns `healthy` and the
//! last probe result, the dispatcher owns `active_connections`. Readers use
//! plain atomic loads so they never see a torn value.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use url::Url;

use crate::health::state::{HealthCheckResult, HealthCheckView};

/// A single backend endpoint.
#[derive(Debug)]
pub struct Instance {
    id: String,
    service_id: String,
    base_url: Url,
    weight: u32,
    healthy: AtomicBool,
    active_connections: AtomicUsize,
    last_check: ArcSwapOption<HealthCheckResult>,
}

impl Instance {
    /// Create a new instance.
    pub fn new(
        id: impl Into<String>,
        service_id: impl Into<String>,
        base_url: Url,
        weight: u32,
        healthy: bool,
    ) -> Self {
        Self {
            id: id.into(),
            service_id: service_id.into(),
            base_url,
            weight: weight.max(1),
            healthy: AtomicBool::new(healthy),
            active_connections: AtomicUsize::new(0),
            last_check: ArcSwapOption::empty(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Declared weight (always >= 1).
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Current number of in-flight calls.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Most recent probe result, if the instance was ever probed.
    pub fn last_health_check(&self) -> Option<Arc<HealthCheckResult>> {
        self.last_check.load_full()
    }

    /// Apply a probe result. Returns true when the healthy flag flipped.
    pub(crate) fn apply_health(&self, result: HealthCheckResult) -> bool {
        let healthy = result.healthy;
        self.last_check.store(Some(Arc::new(result)));
        self.healthy.swap(healthy, Ordering::AcqRel) != healthy
    }

    /// Add `delta` to the connection count, clamping at zero.
    ///
    /// Returns the new count and whether the clamp kicked in.
    pub(crate) fn adjust_connections(&self, delta: isize) -> (usize, bool) {
        let mut clamped = false;
        let previous = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if delta >= 0 {
                    Some(current.saturating_add(delta.unsigned_abs()))
                } else {
                    let decrement = delta.unsigned_abs();
                    clamped = decrement > current;
                    Some(current.saturating_sub(decrement))
                }
            })
            .unwrap_or_else(|current| current);

        let next = if delta >= 0 {
            previous.saturating_add(delta.unsigned_abs())
        } else {
            previous.saturating_sub(delta.unsigned_abs())
        };
        (next, clamped)
    }

    /// Point-in-time view for the admin surface.
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            url: self.base_url.to_string(),
            weight: self.weight,
            healthy: self.is_healthy(),
            active_connections: self.active_connections(),
            last_health_check: self.last_health_check().map(|r| r.view()),
        }
    }
}

/// Serializable instance state.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub url: String,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: usize,
    pub last_health_check: Option<HealthCheckView>,
}
