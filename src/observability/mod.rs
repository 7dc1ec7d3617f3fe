//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access log lines)
//!     → metrics.rs (published values, facade counters)
//!     → tracing.rs (request and operation spans)
//!
//! Consumers:
//!     → Console and optional log file
//!     → GET /debug/vars (JSON snapshot of published values)
//!     → Whatever `metrics` recorder the application installs
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request span
//! - Metrics are cheap (atomic increments, lazily evaluated providers)
//! - Tracing is optional to reduce overhead when not needed

pub mod logging;
pub mod metrics;
pub mod tracing;
