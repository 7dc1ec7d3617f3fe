//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;
use webserver::config::TimeoutConfig;
use webserver::{HttpServer, ServerBuilder, ServerResult};

/// A server running on its own task.
pub struct Running {
    pub server: HttpServer,
    pub addr: SocketAddr,
    pub task: JoinHandle<ServerResult<()>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger the shutdown and wait for `start` to return.
    pub async fn stop(self) -> ServerResult<()> {
        self.server.shutdown_handle().trigger();
        join(self.task).await
    }
}

/// Wait for `start` to return, failing the test after 10 seconds.
pub async fn join(task: JoinHandle<ServerResult<()>>) -> ServerResult<()> {
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("server did not stop in time")
        .expect("server task panicked")
}

/// Timeouts short enough for tests: 2s read, 1s request, 1s in-flight,
/// no shutdown task window, 2s write.
pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig::new(
        Duration::from_secs(2),
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::ZERO,
        Duration::from_secs(2),
    )
}

/// A builder on an ephemeral localhost port with [`fast_timeouts`].
pub fn builder(name: &str) -> ServerBuilder {
    ServerBuilder::new(name, "127.0.0.1:0").with_timeouts(fast_timeouts())
}

/// Build, start on a new task and wait until the listener is up.
pub async fn start(builder: ServerBuilder) -> Running {
    let server = builder.build().expect("valid server configuration");
    let task = server.spawn();
    let addr = tokio::time::timeout(Duration::from_secs(5), server.serving_addr())
        .await
        .expect("server did not come up in time")
        .expect("server stopped before serving");

    Running { server, addr, task }
}

/// HTTP client that never goes through a proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client builds")
}
