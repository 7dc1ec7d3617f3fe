//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (http::server):
//!     Validate config → Subscribe to signals → Spawn accept loop → Serving
//!
//! Stop:
//!     SIGINT/SIGTERM/trigger → Draining → wait for in-flight requests
//!         → in budget: wait for shutdown tasks → Stopped
//!         → over budget: cut connections → KilledHard
//!
//! Signals (signals.rs):
//!     First SIGINT/SIGTERM → graceful drain
//!     Same signal again → process exits (128 + signal number)
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: forced close after deadline

pub mod shutdown;
pub mod signals;
pub mod state;

pub use shutdown::Shutdown;
pub use signals::StopSignal;
pub use state::LifecycleState;
