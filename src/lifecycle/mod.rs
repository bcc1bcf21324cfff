//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Registry, LoadBalancer, CircuitBreakers
//!     → Dispatcher → health loops → admin listener → public listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → health loops exit, servers drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Every background task subscribes to the same shutdown broadcast

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Gateway, StartupError};
