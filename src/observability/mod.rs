//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin API (breaker / balancer snapshots, see admin/)
//! ```
//!
//! # Design Decisions
//! - Structured fields (service, instance, state) on every event
//! - Request ID flows from the HTTP layer to the upstream call
//! - Metrics are cheap macro calls; without an installed recorder they are no-ops

pub mod logging;
pub mod metrics;
