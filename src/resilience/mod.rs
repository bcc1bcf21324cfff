//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch of one call:
//!     → timeouts.rs (absolute deadline for the whole call)
//!     → circuit_breaker.rs (admit or fail fast, then record the outcome)
//!     → latency.rs (mean and percentile estimates per breaker)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - One breaker per service, shared by all of its instances
//! - No retries: a failed call is reported, never replayed

pub mod circuit_breaker;
pub mod latency;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakers, CircuitState, Outcome, Permit, Rejected,
};
