//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one task per connection)
//!     → connection.rs (ID, live count)
//!     → hyper auto builder (HTTP/1.1 or HTTP/2)
//!     → Hand off to the axum router
//!
//! Close directives:
//!     graceful → stop accepting, finish in-flight requests
//!     force    → abort every connection task
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{CloseSignals, Listener};
