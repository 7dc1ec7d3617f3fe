//! Request tracing support.
//!
//! # Responsibilities
//! - Keep named tracers for a server (one per subsystem that wants one)
//! - Create spans for requests and operations, tagged with the tracer name
//!
//! # Design Decisions
//! - Optional: tracing middleware is disabled by default
//! - Looking up an unknown tracer falls back to the server-wide one
//! - Spans go through whatever subscriber the server runs under

use std::sync::Arc;

use axum::http::Request;
use dashmap::DashMap;
use tracing::Span;

use crate::http::middleware::trace::X_REQUEST_ID;

/// Creates spans tagged with its name.
#[derive(Debug, Clone)]
pub struct Tracer {
    name: Arc<str>,
}

impl Tracer {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span around a named unit of work.
    pub fn span(&self, operation: &str) -> Span {
        tracing::info_span!("operation", tracer = %self.name, operation)
    }

    /// Span around one HTTP request.
    pub fn request_span<B>(&self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        tracing::info_span!(
            "request",
            tracer = %self.name,
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
            request_id = %request_id,
        )
    }
}

/// The tracers of one server.
#[derive(Debug, Clone)]
pub struct Telemetry {
    global: Tracer,
    tracers: Arc<DashMap<String, Tracer>>,
}

impl Telemetry {
    /// `service` names the server-wide tracer.
    pub fn new(service: impl Into<Arc<str>>) -> Self {
        Self {
            global: Tracer::new(service),
            tracers: Arc::new(DashMap::new()),
        }
    }

    pub fn service(&self) -> &str {
        self.global.name()
    }

    /// Register a tracer, or return the existing one with that name.
    pub fn new_tracer(&self, name: &str) -> Tracer {
        self.tracers
            .entry(name.to_string())
            .or_insert_with(|| Tracer::new(name))
            .clone()
    }

    /// The tracer registered under `name`, or the server-wide tracer.
    pub fn tracer(&self, name: &str) -> Tracer {
        self.tracers
            .get(name)
            .map(|t| t.value().clone())
            .unwrap_or_else(|| self.global.clone())
    }

    pub fn global_tracer(&self) -> Tracer {
        self.global.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tracer_falls_back_to_global() {
        let telemetry = Telemetry::new("orders");
        assert_eq!(telemetry.tracer("db").name(), "orders");

        telemetry.new_tracer("db");
        assert_eq!(telemetry.tracer("db").name(), "db");
        assert_eq!(telemetry.global_tracer().name(), "orders");
    }

    #[test]
    fn new_tracer_is_idempotent() {
        let telemetry = Telemetry::new("orders");
        let first = telemetry.new_tracer("cache");
        let second = telemetry.new_tracer("cache");
        assert_eq!(first.name(), second.name());
        assert_eq!(telemetry.tracers.len(), 1);
    }
}
