//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (scan routes in configuration order)
//!     → matcher.rs (segment-wise pattern match)
//!     → Return: service id or no match
//!
//! Route Compilation (at startup):
//!     ServiceConfig.patterns
//!     → PathPattern per pattern
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins (configuration order)

pub mod matcher;
pub mod router;

pub use matcher::{PathParams, PathPattern};
pub use router::{RouteMatch, Router};
