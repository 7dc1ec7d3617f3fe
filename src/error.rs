//! Server error types.
//!
//! # Responsibilities
//! - One error type for everything `HttpServer::start` and the builder return
//! - Classify errors by kind so callers never match on message text
//! - Keep the cause chain intact (`#[source]`) for diagnostics
//!
//! # Design Decisions
//! - Request timeouts are not errors here; they are 503 responses
//! - A forced close failure carries the drain timeout as its source

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::validation::ValidationErrors;

/// Result type for server operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Coarse classification of a [`ServerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration, rejected before any listener binds.
    Validation,
    /// The server could not start (bind failure, signal subscription failure).
    Startup,
    /// The serving task failed after it was running.
    Runtime,
    /// In-flight requests outlived the drain budget; connections were cut.
    ShutdownTimeout,
    /// The forced close after a drain timeout failed too.
    ForcedClose,
    /// A stop signal could not be delivered.
    Signal,
}

/// Errors produced while assembling, running or stopping a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationErrors),

    /// Failed to bind to the configured address.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// `start` was called on a server that already left the idle state.
    #[error("server was already started")]
    AlreadyStarted,

    /// Failed to subscribe to termination signals.
    #[error("failed to install {signal} handler: {source}")]
    SignalSubscription {
        signal: &'static str,
        #[source]
        source: io::Error,
    },

    /// The serving task failed.
    #[error("server runtime error: {0}")]
    Runtime(#[source] io::Error),

    /// In-flight requests did not finish within the drain budget.
    #[error("failed to gracefully shut down, timeout of {timeout:?} reached, stopped hard")]
    ShutdownTimeout { timeout: Duration },

    /// Forcing the server closed failed after the drain timed out.
    #[error("failed to hard shut down the server: {reason}")]
    ForcedClose {
        reason: String,
        #[source]
        source: Box<ServerError>,
    },

    /// Delivering a stop signal to the current process failed.
    #[error("failed to deliver {signal} to the current process: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: io::Error,
    },

    /// The configured log file could not be opened.
    #[error("failed to open log file: {0}")]
    Logging(#[source] io::Error),
}

impl ServerError {
    /// Creates a bind error with address context.
    pub fn bind_error(address: &str, source: io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            source,
        }
    }

    /// Returns the kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::Bind { .. }
            | Self::AlreadyStarted
            | Self::SignalSubscription { .. }
            | Self::Logging(_) => ErrorKind::Startup,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::ShutdownTimeout { .. } => ErrorKind::ShutdownTimeout,
            Self::ForcedClose { .. } => ErrorKind::ForcedClose,
            Self::Signal { .. } => ErrorKind::Signal,
        }
    }

    /// Returns a unique error code for this error type.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "E001",
            Self::Bind { .. } => "E002",
            Self::AlreadyStarted => "E003",
            Self::SignalSubscription { .. } => "E004",
            Self::Runtime(_) => "E005",
            Self::ShutdownTimeout { .. } => "E006",
            Self::ForcedClose { .. } => "E007",
            Self::Signal { .. } => "E008",
            Self::Logging(_) => "E009",
        }
    }

    /// Whether retrying (or changing the environment) might help.
    ///
    /// A degraded shutdown already completed, so there is nothing to retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Bind { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::PermissionDenied
                    | io::ErrorKind::AddrInUse
                    | io::ErrorKind::AddrNotAvailable
            ),
            Self::Runtime(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Provides a human-readable suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidConfig(_) => Some(
                "Check the configuration; the request timeout must be smaller than the read timeout",
            ),
            Self::Bind { source, .. } => match source.kind() {
                io::ErrorKind::PermissionDenied => {
                    Some("Try using a port above 1024 or run with appropriate privileges")
                }
                io::ErrorKind::AddrInUse => Some(
                    "The port is already in use. Try a different port or stop the conflicting service",
                ),
                io::ErrorKind::AddrNotAvailable => {
                    Some("The address is not available. Check network interface configuration")
                }
                _ => Some("Check network configuration and firewall settings"),
            },
            Self::ShutdownTimeout { .. } => {
                Some("In-flight requests outlived the drain budget; consider a larger in-flight shutdown timeout")
            }
            _ => None,
        }
    }
}
