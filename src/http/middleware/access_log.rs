//! Access log middleware.
//!
//! One line per request in the combined log format, emitted on the
//! `webserver::access` target at the configured request level:
//!
//! ```text
//! 127.0.0.1 - - [10/Oct/2026:13:55:36 +0000] "GET /api/v1/liveness HTTP/1.1" 200 3 "-" "curl/8.5.0"
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::schema::LogLevel;
use crate::observability::logging::ACCESS_LOG_TARGET;
use crate::observability::metrics;

/// Level access lines are written at.
#[derive(Debug, Clone, Copy)]
pub struct AccessLog {
    level: LogLevel,
}

impl AccessLog {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    fn emit(&self, line: &str) {
        match self.level {
            LogLevel::None => {}
            LogLevel::Fatal | LogLevel::Error => {
                tracing::error!(target: ACCESS_LOG_TARGET, "{}", line)
            }
            LogLevel::Warn => tracing::warn!(target: ACCESS_LOG_TARGET, "{}", line),
            LogLevel::Info => tracing::info!(target: ACCESS_LOG_TARGET, "{}", line),
            LogLevel::Debug => tracing::debug!(target: ACCESS_LOG_TARGET, "{}", line),
            LogLevel::Trace => tracing::trace!(target: ACCESS_LOG_TARGET, "{}", line),
        }
    }
}

fn header_or_dash(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

pub async fn access_log(State(log): State<AccessLog>, request: Request, next: Next) -> Response {
    let started = Instant::now();

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let request_line = format!("{} {} {:?}", method, request.uri(), request.version());
    let referer = header_or_dash(request.headers(), header::REFERER);
    let user_agent = header_or_dash(request.headers(), header::USER_AGENT);

    let response = next.run(request).await;

    let status = response.status();
    metrics::record_request(method.as_str(), status.as_u16(), started.elapsed());

    if !matches!(log.level, LogLevel::None) {
        let size = response
            .body()
            .size_hint()
            .exact()
            .map(|n| n.to_string())
            .unwrap_or_else(|| header_or_dash(response.headers(), header::CONTENT_LENGTH));
        let line = format!(
            "{} - - [{}] \"{}\" {} {} \"{}\" \"{}\"",
            remote,
            chrono::Local::now().format("%d/%b/%Y:%H:%M:%S %z"),
            request_line,
            status.as_u16(),
            size,
            referer,
            user_agent,
        );
        log.emit(&line);
    }

    response
}
