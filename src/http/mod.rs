//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection (net::listener)
//!     → middleware::access_log (combined log line, request counters)
//!     → middleware::trace (request ID, tracer span; optional)
//!     → timeout.rs (per-request deadline, fixed 503)
//!     → router: application routes, endpoint.rs, /readiness, /debug/vars
//! ```

pub mod endpoint;
pub mod handlers;
pub mod middleware;
pub mod mime;
pub mod server;
pub mod timeout;

pub use endpoint::Endpoint;
pub use server::HttpServer;
pub use timeout::{RequestDeadline, RequestTimeoutLayer, REQUEST_TIMEOUT_MESSAGE};
