//! Health probing subsystem.
//!
//! # Data Flow
//! ```text
//! Application code
//!     → ReadinessDeterminer::set_ready (any task, any time)
//!
//! GET /readiness
//!     → Readiness::check (reads every determiner)
//!     → 200 "OK" or 503 naming the failing determiners
//!
//! GET /liveness
//!     → 200 "OK" while the process can answer at all
//! ```

pub mod readiness;

pub use readiness::{Readiness, ReadinessDeterminer, ReadinessStatus};
