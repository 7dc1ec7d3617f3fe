//! Per-request deadline.
//!
//! # Responsibilities
//! - Answer requests whose handler misses the deadline with a fixed 503
//! - Hand every handler a [`RequestDeadline`] it can watch to stop early
//!
//! # Design Decisions
//! - The handler runs in its own task and is not aborted at the deadline;
//!   its late response is dropped and never reaches the client
//! - The deadline covers the whole response body, so a streaming handler is
//!   buffered and answered in one piece or not at all
//! - Cancellation is cooperative through a token that fires at the deadline
//! - The deadline is independent of the connection read/write timeouts and
//!   must be shorter than the read timeout

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::instrument::WithSubscriber;
use tracing::Instrument;

use crate::http::mime;
use crate::observability::metrics;

/// Body of the response sent when a request misses its deadline.
pub const REQUEST_TIMEOUT_MESSAGE: &str = "failed to finish request, timed out";

/// The deadline of the current request.
///
/// Inserted into every request that goes through [`RequestTimeout`]; extract
/// it in a handler to give up once the client has already been answered.
#[derive(Debug, Clone)]
pub struct RequestDeadline {
    deadline: Instant,
    token: CancellationToken,
}

impl RequestDeadline {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the request has been answered with the timeout
    /// response or the client went away.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl<S> FromRequestParts<S> for RequestDeadline
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestDeadline>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "request deadline missing, is the request timeout layer installed?",
        ))
    }
}

/// Applies [`RequestTimeout`] to a service.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeoutLayer {
    timeout: Duration,
}

impl RequestTimeoutLayer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for RequestTimeoutLayer {
    type Service = RequestTimeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTimeout {
            inner,
            timeout: self.timeout,
        }
    }
}

/// Races the inner service against a deadline.
#[derive(Debug, Clone)]
pub struct RequestTimeout<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request<Body>> for RequestTimeout<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        // The ready service is the one in `self`; take it and leave a clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let timeout = self.timeout;
        let deadline = RequestDeadline::new(timeout);
        request.extensions_mut().insert(deadline.clone());

        let method = request.method().clone();
        let path = request.uri().path().to_owned();

        Box::pin(async move {
            // Dropping this future (client gone) cancels the handler's token.
            let guard = deadline.token.clone().drop_guard();
            let handler = tokio::spawn(
                async move {
                    let (parts, body) = inner.call(request).await?.into_parts();
                    Ok::<_, Infallible>((parts, to_bytes(body, usize::MAX).await))
                }
                .in_current_span()
                .with_current_subscriber(),
            );

            match tokio::time::timeout(timeout, handler).await {
                Ok(Ok(Ok((parts, Ok(bytes))))) => {
                    guard.disarm();
                    Ok(Response::from_parts(parts, Body::from(bytes)))
                }
                Ok(Ok(Ok((_, Err(err))))) => {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        error = %err,
                        "Response body failed"
                    );
                    Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
                }
                Ok(Ok(Err(never))) => match never {},
                Ok(Err(join_error)) => {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        error = %join_error,
                        "Request handler panicked"
                    );
                    Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
                }
                Err(_) => {
                    deadline.token.cancel();
                    tracing::warn!(
                        method = %method,
                        path = %path,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    metrics::record_request_timeout();
                    Ok(timeout_response())
                }
            }
        })
    }
}

/// The fixed response for a request that missed its deadline.
pub fn timeout_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8)],
        REQUEST_TIMEOUT_MESSAGE,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler blew up")
    }

    fn app(finished: Arc<AtomicBool>) -> Router {
        Router::new()
            .route("/fast", get(|| async { "fast" }))
            .route(
                "/slow",
                get(move || async move {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    finished.store(true, Ordering::SeqCst);
                    "slow body"
                }),
            )
            .route("/panic", get(explode))
            .route(
                "/stream",
                get(|| async {
                    let chunks = futures_util::stream::unfold(0u8, |sent| async move {
                        if sent == 2 {
                            return None;
                        }
                        tokio::time::sleep(Duration::from_millis(700)).await;
                        Some((Ok::<_, Infallible>(format!("chunk{}", sent)), sent + 1))
                    });
                    Body::from_stream(chunks)
                }),
            )
            .route(
                "/stream-fast",
                get(|| async {
                    let chunks = futures_util::stream::iter(
                        ["a", "b", "c"].map(|chunk| Ok::<_, Infallible>(chunk)),
                    );
                    Body::from_stream(chunks)
                }),
            )
            .layer(RequestTimeoutLayer::new(Duration::from_secs(1)))
    }

    fn get_request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn read_body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fast_handler_passes_through() {
        let response = app(Arc::default()).oneshot(get_request("/fast")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_gets_timeout_response() {
        let finished = Arc::new(AtomicBool::new(false));
        let app = app(finished.clone());

        let started = Instant::now();
        let response = app.oneshot(get_request("/slow")).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_body(response).await, REQUEST_TIMEOUT_MESSAGE);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_keeps_running_after_deadline() {
        let finished = Arc::new(AtomicBool::new(false));
        let app = app(finished.clone());

        let response = app.oneshot(get_request("/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_token_fires_at_deadline() {
        let app = Router::new()
            .route(
                "/wait",
                get(|deadline: RequestDeadline| async move {
                    deadline.cancelled().await;
                    "cancelled"
                }),
            )
            .layer(RequestTimeoutLayer::new(Duration::from_millis(500)));

        let response = app.oneshot(get_request("/wait")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_streaming_body_gets_timeout_response() {
        let response = app(Arc::default()).oneshot(get_request("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_body(response).await, REQUEST_TIMEOUT_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_body_within_deadline_is_buffered() {
        let response = app(Arc::default())
            .oneshot(get_request("/stream-fast"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, "abc");
    }

    #[tokio::test]
    async fn panicking_handler_is_a_server_error() {
        let response = app(Arc::default()).oneshot(get_request("/panic")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn deadline_extractor_needs_layer() {
        let app = Router::new().route("/", get(|_: RequestDeadline| async { "" }));
        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
