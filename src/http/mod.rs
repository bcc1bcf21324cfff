//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, limits, tracing)
//!     → request.rs (request id)
//!     → routing (path → service id)
//!     → dispatch (breaker, instance selection, upstream call)
//!     → response.rs (error rendering, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
