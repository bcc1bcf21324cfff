//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     One timer per service
//!     → Probe every instance concurrently (GET base_url + health_endpoint)
//!     → Registry::set_health with a state.rs result
//! ```
//!
//! # Design Decisions
//! - A single probe decides: 2xx within the timeout is healthy, anything else is not
//! - No retries inside a tick; the next tick is the retry
//! - Each probe carries its own timeout, so one slow instance never delays the others
//! - Probe errors stay here; request callers only ever see the healthy flag

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthCheckResult, HealthCheckView};
