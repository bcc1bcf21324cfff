//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the service set does not change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AdminConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::GatewayConfig;
pub use schema::HealthCheckConfig;
pub use schema::InstanceConfig;
pub use schema::ListenerConfig;
pub use schema::LoadBalancerConfig;
pub use schema::LogFormat;
pub use schema::{merge_services, MergedService, ResolvedInstance};
pub use schema::ObservabilityConfig;
pub use schema::ServiceConfig;
pub use schema::TimeoutConfig;
pub use schema::TripPolicy;
