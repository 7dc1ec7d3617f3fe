//! Request tracing middleware.
//!
//! Every request gets an `x-request-id` (kept when the client sent one) and a
//! span from the server's tracer. The ID is echoed on the response.

use axum::http::{HeaderValue, Request};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::Span;
use uuid::Uuid;

use crate::observability::tracing::{Telemetry, Tracer};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Random v4 UUID request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request spans created by a [`Tracer`].
#[derive(Debug, Clone)]
pub struct TracerSpans {
    tracer: Tracer,
}

impl TracerSpans {
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }
}

impl<B> MakeSpan<B> for TracerSpans {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        self.tracer.request_span(request)
    }
}

/// Wrap `router` in request ID handling and request spans.
pub fn apply(router: Router, telemetry: &Telemetry) -> Router {
    let spans = TracerSpans::new(telemetry.global_tracer());

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http().make_span_with(spans))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}
