//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)                 builder options
//!     → loader.rs (parse)               → builder.rs (applied in order)
//!     → validation.rs (semantic checks) → validation.rs (at build)
//!     → ServerConfig ──────────────────→ ServerBuilder::from_config
//!                                       → HttpServer (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a server is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod builder;
pub mod loader;
pub mod schema;
pub mod validation;

pub use builder::ServerBuilder;
pub use schema::{LogLevel, LoggingConfig, ServerConfig, TimeoutConfig};
pub use validation::{ValidationError, ValidationErrors};
