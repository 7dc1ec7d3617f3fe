//! Endpoint registration.
//!
//! An endpoint is a method, a path and a handler. Paths are relative to the
//! server's base path.

use axum::handler::Handler;
use axum::http::Method;
use axum::routing::{get, on, MethodFilter, MethodRouter};
use axum::Router;

use crate::config::validation::ValidationError;
use crate::health::readiness::{liveness_handler, readiness_handler, Readiness};
use crate::http::handlers::{debug_vars_handler, stop_handler};
use crate::observability::metrics::MetricRegistry;

pub const LIVENESS_PATH: &str = "/liveness";
pub const READINESS_PATH: &str = "/readiness";
pub const STOP_PATH: &str = "/stop";
pub const DEBUG_VARS_PATH: &str = "/debug/vars";

/// A route to mount on a server.
#[derive(Debug)]
pub struct Endpoint {
    method: Method,
    path: String,
    route: MethodRouter,
}

impl Endpoint {
    /// Validate and wrap `handler`.
    ///
    /// `path` must start with `/`; `method` must be one axum can route
    /// (extension methods are rejected).
    pub fn new<H, T>(method: Method, path: impl Into<String>, handler: H) -> Result<Self, ValidationError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ValidationError::InvalidEndpointPath(path));
        }
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| ValidationError::UnsupportedMethod(method.to_string()))?;

        Ok(Self {
            method,
            path,
            route: on(filter, handler),
        })
    }

    /// `GET /liveness`: 200 while the process can answer.
    pub fn liveness() -> Self {
        Self::builtin(LIVENESS_PATH, get(liveness_handler))
    }

    /// `GET /stop[?hard=true]`: stop this process with a signal.
    pub fn stop() -> Self {
        Self::builtin(STOP_PATH, get(stop_handler))
    }

    /// `GET /debug/vars`: JSON snapshot of `registry`.
    pub fn metrics(registry: MetricRegistry) -> Self {
        Self::builtin(DEBUG_VARS_PATH, get(debug_vars_handler).with_state(registry))
    }

    /// `GET /readiness`: 200 only when every determiner is ready.
    pub fn readiness(readiness: Readiness) -> Self {
        Self::builtin(READINESS_PATH, get(readiness_handler).with_state(readiness))
    }

    fn builtin(path: &str, route: MethodRouter) -> Self {
        Self {
            method: Method::GET,
            path: path.to_string(),
            route,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identity used to detect double registration.
    pub(crate) fn key(&self) -> (Method, String) {
        (self.method.clone(), self.path.clone())
    }

    pub(crate) fn mount(self, router: Router) -> Router {
        router.route(&self.path, self.route)
    }
}
