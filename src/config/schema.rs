//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a server.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::Level;

use crate::config::validation::ValidationError;

/// Root configuration for a server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name of the server, used for logs, tracers and the `server` metric.
    pub name: String,

    /// TCP address to listen on (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Optional prefix every route is mounted under (e.g., "/api/v1").
    pub base_path: Option<String>,

    /// Serve published metrics on `/debug/vars`.
    pub enable_metrics: bool,

    /// Wrap requests in tracer spans and tag them with a request ID.
    pub enable_telemetry: bool,

    /// Dedicated logging for this server. When absent, the server logs
    /// through the subscriber that is current when it starts.
    pub logging: Option<LoggingConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "webserver".to_string(),
            address: "127.0.0.1:8080".to_string(),
            base_path: None,
            enable_metrics: false,
            enable_telemetry: false,
            logging: None,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Timeout configuration, in milliseconds.
///
/// `request_ms` must stay below `read_ms`: the per-request deadline has to
/// fire before the connection read deadline would drop the connection,
/// otherwise the timeout response could never be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Max duration for reading the entire request, including the body.
    pub read_ms: u64,

    /// Max duration before a request is answered with a timeout response.
    pub request_ms: u64,

    /// Max duration to wait for in-flight requests during shutdown.
    pub shutdown_in_flight_ms: u64,

    /// Fixed duration reserved for shutdown tasks (flushing caches, files,
    /// telemetry) once in-flight requests are done.
    pub shutdown_task_ms: u64,

    /// Max duration for writing the response.
    pub write_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_ms: 3_000,
            request_ms: 1_000,
            shutdown_in_flight_ms: 3_000,
            shutdown_task_ms: 10_000,
            write_ms: 3_000,
        }
    }
}

impl TimeoutConfig {
    /// Builds a timeout configuration from durations.
    pub fn new(
        read: Duration,
        request: Duration,
        shutdown_in_flight: Duration,
        shutdown_task: Duration,
        write: Duration,
    ) -> Self {
        Self {
            read_ms: millis(read),
            request_ms: millis(request),
            shutdown_in_flight_ms: millis(shutdown_in_flight),
            shutdown_task_ms: millis(shutdown_task),
            write_ms: millis(write),
        }
    }

    pub const fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub const fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub const fn shutdown_in_flight(&self) -> Duration {
        Duration::from_millis(self.shutdown_in_flight_ms)
    }

    pub const fn shutdown_task(&self) -> Duration {
        Duration::from_millis(self.shutdown_task_ms)
    }

    pub const fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for console output.
    pub console_level: LogLevel,

    /// Level the per-request access log lines are emitted at.
    pub request_level: LogLevel,

    /// Optional file to also write logs to. `-` means console only.
    pub filepath: Option<String>,
}

impl LoggingConfig {
    pub fn new(console_level: LogLevel, request_level: LogLevel) -> Self {
        Self {
            console_level,
            request_level,
            filepath: None,
        }
    }

    /// Also append logs to `path`.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.filepath = Some(path.into());
        self
    }
}

/// Log level names accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Logging disabled.
    #[default]
    None,
    /// Unrecoverable failures; logged at error level.
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The tracing level events are emitted at, `None` when disabled.
    pub const fn as_level(self) -> Option<Level> {
        match self {
            Self::None => None,
            Self::Fatal | Self::Error => Some(Level::ERROR),
            Self::Warn => Some(Level::WARN),
            Self::Info => Some(Level::INFO),
            Self::Debug => Some(Level::DEBUG),
            Self::Trace => Some(Level::TRACE),
        }
    }

    /// The filter that lets this level (and more severe ones) through.
    pub fn as_filter(self) -> LevelFilter {
        match self.as_level() {
            Some(level) => LevelFilter::from_level(level),
            None => LevelFilter::OFF,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "fatal" => Ok(Self::Fatal),
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ValidationError::UnknownLogLevel(s.to_string())),
        }
    }
}
