//! HTTP server lifecycle management.
//!
//! Starts an HTTP listener, enforces layered timeouts, aggregates readiness
//! and shuts down gracefully, within a bounded time, on termination signals
//! or a remote stop request.

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerBuilder;
pub use error::{ErrorKind, ServerError, ServerResult};
pub use health::{Readiness, ReadinessDeterminer};
pub use http::{Endpoint, HttpServer, RequestDeadline};
pub use lifecycle::{LifecycleState, Shutdown, StopSignal};
pub use observability::metrics::{Counter, Metric, MetricRegistry};
