//! HTTP middleware.
//!
//! Order, outermost first: access log, then request tracing (when enabled),
//! then the request timeout, then the router.

pub mod access_log;
pub mod trace;

pub use access_log::{access_log, AccessLog};
pub use trace::{TracerSpans, UuidRequestId, X_REQUEST_ID};
