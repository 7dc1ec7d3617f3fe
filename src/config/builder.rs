//! Server assembly.
//!
//! # Responsibilities
//! - Start from documented defaults (or a loaded `ServerConfig`)
//! - Apply options in call order; a later option overwrites an earlier one
//! - Validate everything once in `build`, before any listener binds
//!
//! # Design Decisions
//! - `build` reports every problem at once, like config validation does
//! - List options (endpoints, metrics, readiness) replace the whole list

use std::collections::HashSet;
use std::time::Duration;

use axum::http::Method;
use axum::Router;
use tracing::Dispatch;

use crate::config::schema::{LogLevel, LoggingConfig, ServerConfig, TimeoutConfig};
use crate::config::validation::{validate_config, ValidationError, ValidationErrors};
use crate::error::{ServerError, ServerResult};
use crate::health::readiness::{Readiness, ReadinessDeterminer};
use crate::http::endpoint::{Endpoint, DEBUG_VARS_PATH, READINESS_PATH};
use crate::http::server::{HttpServer, ServerParts};
use crate::observability::logging;
use crate::observability::metrics::{self, Metric, MetricRegistry};
use crate::observability::tracing::Telemetry;

/// Base path used by [`ServerBuilder::with_defaults`].
pub const DEFAULT_BASE_PATH: &str = "/api/v1";

/// Assembles an [`HttpServer`].
#[derive(Debug)]
pub struct ServerBuilder {
    config: ServerConfig,
    router: Router,
    endpoints: Vec<Endpoint>,
    metrics: Vec<Metric>,
    readiness: Vec<ReadinessDeterminer>,
    dispatch: Option<Dispatch>,
}

impl ServerBuilder {
    /// Defaults: 3s read, 1s request, 3s in-flight, 10s task and 3s write
    /// timeouts; no metrics, telemetry, endpoints or readiness determiners.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::from_config(ServerConfig {
            name: name.into(),
            address: address.into(),
            ..ServerConfig::default()
        })
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            endpoints: Vec::new(),
            metrics: Vec::new(),
            readiness: Vec::new(),
            dispatch: None,
        }
    }

    /// The operational preset: liveness and stop endpoints, command line,
    /// server and uptime metrics, telemetry, error level logging and the
    /// `/api/v1` base path.
    pub fn with_defaults(name: impl Into<String>, address: impl Into<String>) -> Self {
        let builder = Self::new(name, address);
        let server = metrics::server_info(builder.config.name.clone(), builder.config.address.clone());

        builder
            .with_base_path(DEFAULT_BASE_PATH)
            .with_endpoints(vec![Endpoint::liveness(), Endpoint::stop()])
            .with_metrics(vec![metrics::command_line(), server, metrics::uptime()])
            .with_telemetry()
            .with_logging(LoggingConfig::new(LogLevel::Error, LogLevel::Error))
    }

    /// Routes of the application. Paths must not collide with the
    /// registered endpoints or the built-in `/readiness` and `/debug/vars`.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.config.base_path = Some(base_path.into());
        self
    }

    pub fn with_timeout(
        self,
        read: Duration,
        request: Duration,
        shutdown_in_flight: Duration,
        shutdown_task: Duration,
        write: Duration,
    ) -> Self {
        self.with_timeouts(TimeoutConfig::new(
            read,
            request,
            shutdown_in_flight,
            shutdown_task,
            write,
        ))
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Give the server its own subscriber instead of logging through the
    /// one current when it starts.
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = Some(logging);
        self
    }

    /// Log through `dispatch` instead of a subscriber built from the logging
    /// config. The config still sets the access log level.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_readiness(mut self, determiners: Vec<ReadinessDeterminer>) -> Self {
        self.readiness = determiners;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Publish `metrics` and serve them on `/debug/vars`.
    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = metrics;
        self.config.enable_metrics = true;
        self
    }

    /// Wrap requests in tracer spans and give them request IDs.
    pub fn with_telemetry(mut self) -> Self {
        self.config.enable_telemetry = true;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Validate and assemble the server. Nothing is bound yet.
    pub fn build(self) -> ServerResult<HttpServer> {
        let mut errors = match validate_config(&self.config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.errors().to_vec(),
        };
        errors.extend(self.endpoint_errors());
        if self.metrics.iter().any(|m| m.name().trim().is_empty()) {
            errors.push(ValidationError::EmptyMetricName);
        }
        if !errors.is_empty() {
            let errors = ValidationErrors::from(errors);
            tracing::error!(name = %self.config.name, errors = %errors, "Invalid server configuration");
            return Err(ServerError::InvalidConfig(errors));
        }

        let dispatch = match (self.dispatch, &self.config.logging) {
            (Some(dispatch), _) => Some(dispatch),
            (None, Some(config)) => Some(logging::dispatch(config).map_err(ServerError::Logging)?),
            (None, None) => None,
        };

        let registry = MetricRegistry::new();
        for metric in self.metrics {
            registry
                .publish(metric)
                .map_err(|err| ServerError::InvalidConfig(err.into()))?;
        }

        tracing::debug!(
            name = %self.config.name,
            address = %self.config.address,
            endpoints = self.endpoints.len(),
            determiners = self.readiness.len(),
            metrics = registry.len(),
            "Server assembled"
        );

        Ok(HttpServer::from_parts(ServerParts {
            telemetry: Telemetry::new(self.config.name.clone()),
            config: self.config,
            router: self.router,
            endpoints: self.endpoints,
            readiness: Readiness::new(self.readiness),
            metrics: registry,
            dispatch,
        }))
    }

    fn endpoint_errors(&self) -> Vec<ValidationError> {
        let mut seen: HashSet<(Method, String)> = HashSet::new();
        seen.insert((Method::GET, READINESS_PATH.to_string()));
        if self.config.enable_metrics {
            seen.insert((Method::GET, DEBUG_VARS_PATH.to_string()));
        }

        self.endpoints
            .iter()
            .filter(|endpoint| !seen.insert(endpoint.key()))
            .map(|endpoint| ValidationError::DuplicateEndpoint {
                method: endpoint.method().to_string(),
                path: endpoint.path().to_string(),
            })
            .collect()
    }
}
