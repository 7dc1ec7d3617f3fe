//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Registry of published values served as JSON on `/debug/vars`
//! - Built-in values: command line, server identity, uptime
//! - Internal counters through the `metrics` facade
//!
//! # Metrics
//! - `webserver_requests_total` (counter): requests by method, status
//! - `webserver_request_duration_seconds` (histogram): latency distribution
//! - `webserver_request_timeouts_total` (counter): requests answered with the timeout response
//! - `webserver_shutdowns_total` (counter): shutdowns by outcome
//!
//! # Design Decisions
//! - Published values are providers evaluated on read, never cached
//! - Facade counters are no-ops until the embedding application installs a recorder

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::validation::ValidationError;

type Provider = Arc<dyn Fn() -> Value + Send + Sync>;

/// A named value published on `/debug/vars`.
#[derive(Clone)]
pub struct Metric {
    name: String,
    provider: Provider,
}

impl Metric {
    /// Publish whatever `provider` returns each time the metric is read.
    pub fn new<F, T>(name: impl Into<String>, provider: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize,
    {
        Self {
            name: name.into(),
            provider: Arc::new(move || serde_json::to_value(provider()).unwrap_or(Value::Null)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Value {
        (self.provider)()
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric").field("name", &self.name).finish()
    }
}

/// Integer counter that can be published as a metric.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// A metric reading this counter.
    pub fn metric(&self, name: impl Into<String>) -> Metric {
        let counter = self.clone();
        Metric::new(name, move || counter.value())
    }
}

/// Published metrics, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    metrics: Arc<DashMap<String, Metric>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a metric. A metric with the same name is replaced.
    pub fn publish(&self, metric: Metric) -> Result<(), ValidationError> {
        if metric.name.trim().is_empty() {
            return Err(ValidationError::EmptyMetricName);
        }
        if self.metrics.insert(metric.name.clone(), metric).is_some() {
            tracing::debug!("Replaced published metric");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        // Evaluate outside the shard lock; providers may be arbitrary code.
        let metric = self.metrics.get(name).map(|entry| entry.value().clone())?;
        Some(metric.value())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Current value of every metric, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let metrics: Vec<Metric> = self.metrics.iter().map(|e| e.value().clone()).collect();
        metrics
            .into_iter()
            .map(|metric| {
                let value = metric.value();
                (metric.name, value)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// `cmdline`: the arguments the process was started with.
pub fn command_line() -> Metric {
    let args: Vec<String> = std::env::args().collect();
    Metric::new("cmdline", move || args.clone())
}

#[derive(Debug, Clone, Serialize)]
struct ServerInfo {
    address: String,
    name: String,
    pid: u32,
}

/// `server`: name, configured address and process id.
pub fn server_info(name: impl Into<String>, address: impl Into<String>) -> Metric {
    let info = ServerInfo {
        address: address.into(),
        name: name.into(),
        pid: std::process::id(),
    };
    Metric::new("server", move || info.clone())
}

/// `uptime`: seconds since this metric was created.
pub fn uptime() -> Metric {
    let started = Instant::now();
    Metric::new("uptime", move || started.elapsed().as_secs())
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    metrics::counter!(
        "webserver_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("webserver_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_request_timeout() {
    metrics::counter!("webserver_request_timeouts_total").increment(1);
}

pub fn record_shutdown(outcome: &'static str) {
    metrics::counter!("webserver_shutdowns_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn providers_are_read_lazily() {
        let registry = MetricRegistry::new();
        let counter = Counter::new();
        registry.publish(counter.metric("jobs")).unwrap();

        assert_eq!(registry.get("jobs"), Some(json!(0)));
        counter.add(3);
        assert_eq!(registry.get("jobs"), Some(json!(3)));
    }

    #[test]
    fn rejects_empty_names() {
        let registry = MetricRegistry::new();
        let err = registry.publish(Metric::new(" ", || 1)).unwrap_err();
        assert_eq!(err, ValidationError::EmptyMetricName);
        assert!(registry.is_empty());
    }

    #[test]
    fn same_name_replaces() {
        let registry = MetricRegistry::new();
        registry.publish(Metric::new("answer", || 1)).unwrap();
        registry.publish(Metric::new("answer", || 42)).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("answer"), Some(json!(42)));
    }

    #[test]
    fn snapshot_includes_builtins() {
        let registry = MetricRegistry::new();
        registry.publish(command_line()).unwrap();
        registry.publish(server_info("orders", "127.0.0.1:8080")).unwrap();
        registry.publish(uptime()).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot.keys().collect::<Vec<_>>(),
            vec!["cmdline", "server", "uptime"]
        );
        assert_eq!(snapshot["server"]["name"], json!("orders"));
        assert_eq!(snapshot["server"]["pid"], json!(std::process::id()));
        assert!(snapshot["cmdline"].is_array());
    }

    #[test]
    fn facade_helpers_without_recorder() {
        record_request("GET", 200, Duration::from_millis(5));
        record_request_timeout();
        record_shutdown("graceful");
    }
}
