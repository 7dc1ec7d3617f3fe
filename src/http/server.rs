//! HTTP server lifecycle controller.
//!
//! # Responsibilities
//! - Assemble the handler chain: access log → tracing → request timeout → router
//! - Bind and serve on a dedicated task, reporting failures through its result
//! - Subscribe to stop signals before blocking on them
//! - Drain in-flight requests within a budget, cut them off past it
//! - Reserve a fixed window for shutdown tasks before returning
//!
//! # Design Decisions
//! - `start` blocks the caller until the server is fully stopped
//! - Every task the server spawns runs under the server's own dispatcher
//! - A second identical signal while draining exits the process at once

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::Router;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tower_http::timeout::{RequestBodyTimeoutLayer, ResponseBodyTimeoutLayer};
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::config::builder::ServerBuilder;
use crate::config::schema::{LogLevel, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::health::readiness::Readiness;
use crate::http::endpoint::Endpoint;
use crate::http::middleware::{access_log, trace, AccessLog};
use crate::http::timeout::RequestTimeoutLayer;
use crate::lifecycle::signals::{self, SignalListener, StopSignal};
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::lifecycle::Shutdown;
use crate::net::listener::{CloseSignals, Listener};
use crate::observability::metrics::{self, MetricRegistry};
use crate::observability::tracing::Telemetry;

/// How long connection tasks get to unwind after being aborted.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Access lines go out at this level when the server has no logging config.
const DEFAULT_REQUEST_LEVEL: LogLevel = LogLevel::Debug;

/// Everything a server is built from.
pub(crate) struct ServerParts {
    pub config: ServerConfig,
    pub router: Router,
    pub endpoints: Vec<Endpoint>,
    pub readiness: Readiness,
    pub metrics: MetricRegistry,
    pub telemetry: Telemetry,
    pub dispatch: Option<Dispatch>,
}

struct Inner {
    config: ServerConfig,
    app: Router,
    metrics: MetricRegistry,
    telemetry: Telemetry,
    readiness: Readiness,
    dispatch: Option<Dispatch>,
    state: StateCell,
    serving_addr: watch::Sender<Option<SocketAddr>>,
    shutdown: Shutdown,
    started: AtomicBool,
}

/// An HTTP server with a managed lifecycle.
///
/// Cheap to clone; clones control the same server.
#[derive(Clone)]
pub struct HttpServer {
    inner: Arc<Inner>,
}

impl HttpServer {
    /// Start assembling a server.
    pub fn builder(name: impl Into<String>, address: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(name, address)
    }

    /// A server with the operational defaults: liveness and stop endpoints,
    /// command line, server and uptime metrics, telemetry, error logging and
    /// the `/api/v1` base path.
    pub fn with_defaults(name: impl Into<String>, address: impl Into<String>) -> ServerResult<Self> {
        ServerBuilder::with_defaults(name, address).build()
    }

    pub(crate) fn from_parts(parts: ServerParts) -> Self {
        let ServerParts {
            config,
            router,
            endpoints,
            readiness,
            metrics,
            telemetry,
            dispatch,
        } = parts;

        let app = assemble(&config, router, endpoints, &readiness, &metrics, &telemetry);
        let (serving_addr, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                config,
                app,
                metrics,
                telemetry,
                readiness,
                dispatch,
                state: StateCell::new(),
                serving_addr,
                shutdown: Shutdown::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Serve until stopped.
    ///
    /// Returns the bind or serving error if the server fails before any stop
    /// signal, `Ok(())` after a graceful shutdown, and
    /// [`ServerError::ShutdownTimeout`] when in-flight requests had to be cut.
    pub async fn start(&self) -> ServerResult<()> {
        match &self.inner.dispatch {
            Some(dispatch) => self.run().with_subscriber(dispatch.clone()).await,
            None => self.run().await,
        }
    }

    async fn run(&self) -> ServerResult<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let mut signals = match SignalListener::install(inner.shutdown.clone()) {
            Ok(signals) => signals,
            Err(err) => {
                inner.state.transition(LifecycleState::Stopped);
                return Err(err);
            }
        };

        let close = CloseSignals::default();
        let mut serving = tokio::spawn(serve(Arc::clone(inner), close.clone()).with_current_subscriber());

        let received = tokio::select! {
            joined = &mut serving => {
                let result = flatten(joined);
                inner.state.transition(LifecycleState::Stopped);
                if let Err(err) = &result {
                    tracing::error!(
                        name = %inner.config.name,
                        error = %err,
                        code = err.error_code(),
                        "Server failed"
                    );
                }
                return result;
            }
            received = signals.recv() => received,
        };

        tracing::info!(name = %inner.config.name, stop = ?received, "Stop requested, draining");
        signals.rearm(received);
        inner.state.transition(LifecycleState::Draining);
        close.graceful.cancel();

        let timeouts = inner.config.timeouts;
        let budget = timeouts.shutdown_in_flight();

        match tokio::time::timeout(budget, &mut serving).await {
            Ok(joined) => {
                let residual = flatten(joined);
                let task_window = timeouts.shutdown_task();
                if !task_window.is_zero() {
                    tracing::info!(
                        window_ms = task_window.as_millis() as u64,
                        "Waiting for shutdown tasks"
                    );
                    tokio::time::sleep(task_window).await;
                }
                inner.state.transition(LifecycleState::Stopped);
                metrics::record_shutdown("graceful");
                tracing::info!(name = %inner.config.name, "Server stopped");
                residual
            }
            Err(_) => {
                tracing::warn!(
                    name = %inner.config.name,
                    budget_ms = budget.as_millis() as u64,
                    "In-flight requests outlived the drain budget, closing connections"
                );
                close.force.cancel();
                inner.state.transition(LifecycleState::KilledHard);
                metrics::record_shutdown("killed_hard");

                let timed_out = ServerError::ShutdownTimeout { timeout: budget };
                let forced = match tokio::time::timeout(FORCE_CLOSE_GRACE, &mut serving).await {
                    Ok(Ok(Ok(()))) => None,
                    Ok(Ok(Err(err))) => Some(err.to_string()),
                    Ok(Err(join_error)) => Some(join_error.to_string()),
                    Err(_) => {
                        serving.abort();
                        Some(format!(
                            "connections still open {:?} after being closed",
                            FORCE_CLOSE_GRACE
                        ))
                    }
                };

                match forced {
                    None => Err(timed_out),
                    Some(reason) => {
                        tracing::error!(reason = %reason, "Forced close failed");
                        Err(ServerError::ForcedClose {
                            reason,
                            source: Box::new(timed_out),
                        })
                    }
                }
            }
        }
    }

    /// Run [`start`](Self::start) on a new task.
    pub fn spawn(&self) -> JoinHandle<ServerResult<()>> {
        let server = self.clone();
        tokio::spawn(async move { server.start().await })
    }

    /// Deliver a stop signal to this process.
    ///
    /// A running server reacts to it exactly as to an operator's signal.
    pub fn stop(&self, signal: StopSignal) -> ServerResult<()> {
        signals::raise(signal)
    }

    /// Stops the server without involving OS signals.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.inner.shutdown.clone()
    }

    /// The bound address once the server is serving, `None` if it stopped
    /// without ever serving.
    pub async fn serving_addr(&self) -> Option<SocketAddr> {
        let mut addr = self.inner.serving_addr.subscribe();
        let mut state = self.inner.state.subscribe();

        loop {
            if let Some(bound) = *addr.borrow_and_update() {
                return Some(bound);
            }
            if state.borrow_and_update().is_terminal() {
                return None;
            }
            tokio::select! {
                changed = addr.changed() => if changed.is_err() { return None },
                changed = state.changed() => if changed.is_err() { return None },
            }
        }
    }

    /// The bound address, if the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.serving_addr.borrow()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    /// Resolves once the server reaches `Stopped` or `KilledHard`.
    pub async fn stopped(&self) -> LifecycleState {
        self.inner.state.wait_for(LifecycleState::is_terminal).await
    }

    /// The fully layered router the server serves.
    pub fn router(&self) -> Router {
        self.inner.app.clone()
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.inner.metrics
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }

    pub fn readiness(&self) -> &Readiness {
        &self.inner.readiness
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("name", &self.inner.config.name)
            .field("address", &self.inner.config.address)
            .field("state", &self.state())
            .finish()
    }
}

/// Bind, publish the address and run the accept loop.
async fn serve(inner: Arc<Inner>, close: CloseSignals) -> ServerResult<()> {
    let listener = Listener::bind(&inner.config.address, inner.config.timeouts.read()).await?;
    let addr = listener.local_addr();

    if !inner.state.transition(LifecycleState::Serving) {
        tracing::debug!(address = %addr, "Stopped before serving");
        return Ok(());
    }
    inner.serving_addr.send_replace(Some(addr));

    tracing::info!(
        name = %inner.config.name,
        address = %addr,
        base_path = inner.config.base_path.as_deref().unwrap_or("/"),
        "Server started"
    );

    listener
        .serve(inner.app.clone(), close)
        .await
        .map_err(ServerError::Runtime)
}

fn flatten(joined: Result<ServerResult<()>, JoinError>) -> ServerResult<()> {
    joined.map_err(|err| ServerError::Runtime(std::io::Error::other(err)))?
}

/// Build the served router, innermost layer first.
fn assemble(
    config: &ServerConfig,
    router: Router,
    endpoints: Vec<Endpoint>,
    readiness: &Readiness,
    metrics: &MetricRegistry,
    telemetry: &Telemetry,
) -> Router {
    let timeouts = config.timeouts;

    let mut routes = router;
    for endpoint in endpoints {
        routes = endpoint.mount(routes);
    }
    routes = Endpoint::readiness(readiness.clone()).mount(routes);
    if config.enable_metrics {
        routes = Endpoint::metrics(metrics.clone()).mount(routes);
    }

    let routes = match config.base_path.as_deref() {
        Some(base) => Router::new().nest(base, routes),
        None => routes,
    };

    let mut app = routes
        .layer(RequestTimeoutLayer::new(timeouts.request()))
        .layer(RequestBodyTimeoutLayer::new(timeouts.read()))
        .layer(ResponseBodyTimeoutLayer::new(timeouts.write()));

    if config.enable_telemetry {
        app = trace::apply(app, telemetry);
    }

    let request_level = config
        .logging
        .as_ref()
        .map_or(DEFAULT_REQUEST_LEVEL, |logging| logging.request_level);
    app.layer(from_fn_with_state(AccessLog::new(request_level), access_log))
}
