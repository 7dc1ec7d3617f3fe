//! Structured logging.
//!
//! # Responsibilities
//! - Build the subscriber a server logs through from its `LoggingConfig`
//! - Console output plus an optional append-only log file
//! - Route access-log lines (target `webserver::access`) at their own level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - No hidden global: a server holds its own `Dispatch` and runs its tasks
//!   under it. Only the binary installs a global default (`init`).
//! - `RUST_LOG` overrides the configured levels when set

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing::Dispatch;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::schema::LoggingConfig;

/// Target the access-log middleware emits on.
pub const ACCESS_LOG_TARGET: &str = "webserver::access";

/// Filter directives derived from the configured levels.
pub fn default_directives(config: &LoggingConfig) -> String {
    format!(
        "{},{}={}",
        config.console_level.as_filter(),
        ACCESS_LOG_TARGET,
        config.request_level.as_filter()
    )
}

/// Build a dispatcher for `config`.
///
/// Fails only when the configured log file cannot be opened.
pub fn dispatch(config: &LoggingConfig) -> io::Result<Dispatch> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let file_layer = match config.filepath.as_deref() {
        None | Some("") | Some("-") => None,
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer);

    Ok(Dispatch::new(subscriber))
}

/// The dispatcher that is current for the calling task.
pub fn current() -> Dispatch {
    tracing::dispatcher::get_default(Dispatch::clone)
}

/// Install `config` as the process-wide default subscriber and return it, so
/// a server can share it instead of opening the log file again.
pub fn init(config: &LoggingConfig) -> io::Result<Dispatch> {
    let dispatch = dispatch(config)?;
    tracing::dispatcher::set_global_default(dispatch.clone()).map_err(io::Error::other)?;
    Ok(dispatch)
}
