//! Readiness determiners and their aggregation.
//!
//! # Responsibilities
//! - Named readiness flags shared between application code and the server
//! - Combine every registered flag into one `/readiness` answer
//!
//! # Design Decisions
//! - One mutex per determiner guards both the name and the flag
//! - The aggregator re-reads every flag on each probe; nothing is cached
//! - The set of determiners is fixed once the handler is built, flags are not

use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::mime;

/// Body of a successful probe.
pub const READY_BODY: &str = "OK\n";

#[derive(Debug)]
struct Flag {
    name: String,
    ready: bool,
}

/// A named, thread-safe readiness flag.
///
/// Clones share the same flag, so the handle given to the server and the one
/// kept by the application observe each other's writes.
#[derive(Debug, Clone)]
pub struct ReadinessDeterminer {
    inner: Arc<Mutex<Flag>>,
}

impl ReadinessDeterminer {
    /// Create a determiner that starts out not ready.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Flag {
                name: name.into(),
                ready: false,
            })),
        }
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.lock().name = name.into();
    }

    pub fn set_ready(&self, ready: bool) {
        let mut flag = self.lock();
        if flag.ready != ready {
            tracing::debug!(determiner = %flag.name, ready, "Readiness changed");
        }
        flag.ready = ready;
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    // A panic while holding the lock cannot leave a bool and a String in a
    // torn state, so a poisoned lock is still usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, Flag> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of a readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStatus {
    Ready,
    /// Names of the determiners that were not ready, in registration order.
    NotReady(Vec<String>),
}

impl ReadinessStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl IntoResponse for ReadinessStatus {
    fn into_response(self) -> Response {
        match self {
            Self::Ready => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8)],
                READY_BODY,
            )
                .into_response(),
            Self::NotReady(names) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8)],
                format!("server isn't ready. {} failed readiness", names.join(", ")),
            )
                .into_response(),
        }
    }
}

/// Aggregates a fixed set of determiners.
///
/// The server is ready only when every determiner is ready. An empty set is
/// ready.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    determiners: Arc<[ReadinessDeterminer]>,
}

impl Readiness {
    pub fn new(determiners: Vec<ReadinessDeterminer>) -> Self {
        Self {
            determiners: determiners.into(),
        }
    }

    pub fn determiners(&self) -> &[ReadinessDeterminer] {
        &self.determiners
    }

    /// Read every determiner once.
    pub fn check(&self) -> ReadinessStatus {
        let failing: Vec<String> = self
            .determiners
            .iter()
            .filter(|d| !d.is_ready())
            .map(ReadinessDeterminer::name)
            .collect();

        if failing.is_empty() {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::NotReady(failing)
        }
    }
}

/// `GET /readiness`
pub async fn readiness_handler(State(readiness): State<Readiness>) -> ReadinessStatus {
    let status = readiness.check();
    if let ReadinessStatus::NotReady(names) = &status {
        tracing::debug!(failing = ?names, "Readiness probe failed");
    }
    status
}

/// `GET /liveness`
pub async fn liveness_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8)],
        READY_BODY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(status: ReadinessStatus) -> (StatusCode, String) {
        let response = status.into_response();
        let code = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn determiner_starts_not_ready() {
        let determiner = ReadinessDeterminer::new("db");
        assert!(!determiner.is_ready());
        assert_eq!(determiner.name(), "db");
    }

    #[test]
    fn clones_share_state() {
        let determiner = ReadinessDeterminer::new("db");
        let handle = determiner.clone();

        handle.set_ready(true);
        assert!(determiner.is_ready());

        handle.set_name("primary-db");
        assert_eq!(determiner.name(), "primary-db");
    }

    #[test]
    fn concurrent_writers() {
        let determiner = ReadinessDeterminer::new("flappy");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let d = determiner.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        d.set_ready(i % 2 == 0);
                        let _ = d.is_ready();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        determiner.set_ready(true);
        assert!(determiner.is_ready());
    }

    #[tokio::test]
    async fn empty_set_is_ready() {
        let (code, body) = body_of(Readiness::default().check()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "OK\n");
    }

    #[tokio::test]
    async fn reports_only_failing_names() {
        let db = ReadinessDeterminer::new("db");
        let cache = ReadinessDeterminer::new("cache");
        db.set_ready(true);
        let readiness = Readiness::new(vec![db, cache]);

        let (code, body) = body_of(readiness.check()).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "server isn't ready. cache failed readiness");
        assert!(!body.contains("db"));
    }

    #[test]
    fn failing_names_keep_registration_order() {
        let readiness = Readiness::new(vec![
            ReadinessDeterminer::new("queue"),
            ReadinessDeterminer::new("db"),
            ReadinessDeterminer::new("cache"),
        ]);
        assert_eq!(
            readiness.check(),
            ReadinessStatus::NotReady(vec!["queue".into(), "db".into(), "cache".into()])
        );
    }

    #[test]
    fn flip_is_visible_on_next_check() {
        let db = ReadinessDeterminer::new("db");
        let readiness = Readiness::new(vec![db.clone()]);
        assert!(!readiness.check().is_ready());

        db.set_ready(true);
        assert!(readiness.check().is_ready());

        db.set_ready(false);
        assert!(!readiness.check().is_ready());
    }
}
