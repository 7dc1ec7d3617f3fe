//! Programmatic shutdown trigger.

use tokio_util::sync::CancellationToken;

/// Handle that stops a running server the same way a termination signal does.
///
/// Clones share one trigger. Triggering twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the shutdown.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`trigger`](Self::trigger) was called on any clone.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clones_share_trigger() {
        let shutdown = Shutdown::new();
        let handle = shutdown.clone();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn(async move { shutdown.triggered().await });
        handle.trigger();
        handle.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke up")
            .unwrap();
        assert!(handle.is_triggered());
    }
}
