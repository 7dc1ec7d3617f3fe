//! Built-in operational handlers.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::http::mime;
use crate::lifecycle::signals::{self, StopSignal};
use crate::observability::metrics::MetricRegistry;

/// Query of `GET /stop`.
#[derive(Debug, Default, Deserialize)]
pub struct StopParams {
    /// Kill the process instead of draining it.
    #[serde(default)]
    pub hard: bool,
}

/// `GET /stop[?hard=true]`
///
/// Answers, then delivers SIGINT (or SIGKILL when `hard`) to this process, so
/// a remote stop takes the same shutdown path as an operator's Ctrl-C.
pub async fn stop_handler(Query(params): Query<StopParams>) -> Response {
    let signal = StopSignal::from_hard(params.hard);

    match signals::raise_after(signal, signals::STOP_SIGNAL_DELAY) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8)],
            "OK\n",
        )
            .into_response(),
        Err(err) => {
            tracing::error!(signal = signal.name(), error = %err, "Stop request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8)],
                err.to_string(),
            )
                .into_response()
        }
    }
}

/// `GET /debug/vars`: every published metric as one JSON object.
pub async fn debug_vars_handler(State(registry): State<MetricRegistry>) -> impl IntoResponse {
    Json(registry.snapshot())
}
