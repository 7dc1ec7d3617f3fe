//! TCP listener and accept loop.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept connections and serve each one on its own task
//! - Apply the header read deadline to every HTTP/1 connection
//! - On the graceful directive: stop accepting, let connections finish
//!   their in-flight requests, disable keep-alive
//! - On the force directive: abort every connection task
//!
//! # Design Decisions
//! - The accept loop owns the listener and all connection tasks; the
//!   lifecycle controller only sends directives through cancellation tokens
//! - Accept errors are logged and the loop keeps going

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::instrument::WithSubscriber;

use crate::error::{ServerError, ServerResult};
use crate::net::connection::ConnectionTracker;

/// Pause after an accept error that is not about a single connection
/// (for example running out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Directives from the lifecycle controller to the accept loop.
#[derive(Debug, Clone, Default)]
pub struct CloseSignals {
    /// Stop accepting and drain.
    pub graceful: CancellationToken,
    /// Cut every remaining connection.
    pub force: CancellationToken,
}

/// A bound listener, not yet accepting.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    read_timeout: Duration,
    tracker: ConnectionTracker,
}

impl Listener {
    /// Bind to `address` (`host:port`, resolved here).
    pub async fn bind(address: &str, read_timeout: Duration) -> ServerResult<Self> {
        let inner = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::bind_error(address, e))?;
        let local_addr = inner
            .local_addr()
            .map_err(|e| ServerError::bind_error(address, e))?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self {
            inner,
            local_addr,
            read_timeout,
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `app` until told to close.
    ///
    /// Returns once every connection task has ended. Only a panicking
    /// connection task is reported as an error.
    pub async fn serve(self, app: Router, close: CloseSignals) -> io::Result<()> {
        let Self {
            inner: listener,
            local_addr,
            read_timeout,
            tracker,
        } = self;

        let mut builder = Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(read_timeout)
            .keep_alive(true);

        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = close.graceful.cancelled() => break,

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "Connection task panicked");
                        }
                    }
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "Failed to accept connection");
                            if !is_connection_error(&err) {
                                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            }
                            continue;
                        }
                    };

                    let guard = tracker.track();
                    tracing::trace!(connection_id = %guard.id(), peer_addr = %peer, "Connection accepted");

                    let service = app.clone().map_request(move |mut request: Request<Incoming>| {
                        request.extensions_mut().insert(ConnectInfo(peer));
                        request
                    });
                    let service = TowerToHyperService::new(service);
                    let builder = builder.clone();
                    let watcher = graceful.watcher();

                    connections.spawn(
                        async move {
                            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                            if let Err(err) = watcher.watch(conn).await {
                                tracing::debug!(connection_id = %guard.id(), error = %err, "Connection ended with error");
                            }
                            drop(guard);
                        }
                        .with_current_subscriber(),
                    );
                }
            }
        }

        drop(listener);
        tracing::info!(
            address = %local_addr,
            active_connections = tracker.active_count(),
            "Stopped accepting connections"
        );

        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::debug!("All connections drained");
            }
            _ = close.force.cancelled() => {
                tracing::warn!(
                    active_connections = tracker.active_count(),
                    "Closing remaining connections"
                );
                connections.abort_all();
            }
        }

        let mut panicked = 0usize;
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    panicked += 1;
                }
            }
        }

        if panicked > 0 {
            return Err(io::Error::other(format!(
                "{} connection task(s) panicked",
                panicked
            )));
        }

        tracing::debug!(
            accepted = tracker.accepted_count(),
            "Accept loop finished"
        );
        Ok(())
    }
}

/// Errors that only concern the connection being accepted.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
