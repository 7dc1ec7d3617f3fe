//! Server lifecycle state machine.
//!
//! # States
//! ```text
//! Idle → Serving → Draining → Stopped
//!                           → KilledHard
//! Idle → Stopped            (bind failure)
//! Serving → Stopped         (accept loop failed)
//! Idle → Draining           (signal before the listener came up)
//! ```
//!
//! # Design Decisions
//! - Transitions only move forward; `Serving` is entered at most once
//! - Held in a watch channel so tests and the readiness glue can await states

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Where a server is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Built, `start` not called yet.
    Idle,
    /// Listener bound, accepting connections.
    Serving,
    /// Stop signal received; no new connections, waiting for in-flight requests.
    Draining,
    /// Shut down without cutting any request short.
    Stopped,
    /// In-flight requests outlived the drain budget and were cut.
    KilledHard,
}

impl LifecycleState {
    pub const fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Serving)
                | (Idle, Draining)
                | (Idle, Stopped)
                | (Serving, Draining)
                | (Serving, Stopped)
                | (Draining, Stopped)
                | (Draining, KilledHard)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::KilledHard)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::KilledHard => "killed_hard",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable lifecycle state.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next` if that is a legal transition. Returns whether it moved.
    pub fn transition(&self, next: LifecycleState) -> bool {
        let mut from = None;
        let moved = self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match from {
            Some(from) => tracing::debug!(%from, to = %next, "Lifecycle transition"),
            None => tracing::trace!(current = %self.get(), rejected = %next, "Lifecycle transition rejected"),
        }
        moved
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_for(&self, predicate: impl Fn(LifecycleState) -> bool) -> LifecycleState {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // `self` holds the sender, so the channel cannot close under us.
            Err(_) => self.get(),
        };
        state
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn happy_path() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), Idle);
        assert!(cell.transition(Serving));
        assert!(cell.transition(Draining));
        assert!(cell.transition(Stopped));
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn serving_entered_once() {
        let cell = StateCell::new();
        assert!(cell.transition(Serving));
        assert!(!cell.transition(Serving));
        assert!(cell.transition(Draining));
        assert!(!cell.transition(Serving));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Stopped, KilledHard] {
            for next in [Idle, Serving, Draining, Stopped, KilledHard] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn killed_hard_only_from_draining() {
        assert!(Draining.can_transition_to(KilledHard));
        assert!(!Serving.can_transition_to(KilledHard));
        assert!(!Idle.can_transition_to(KilledHard));
    }

    #[tokio::test]
    async fn wait_for_sees_later_transition() {
        let cell = StateCell::new();
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_for(|s| s == Serving).await })
        };
        cell.transition(Serving);
        assert_eq!(waiter.await.unwrap(), Serving);
    }
}
