//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to SIGINT and SIGTERM before a server blocks on them
//! - Translate signals (and the programmatic trigger) into one stop event
//! - Deliver stop signals to the current process for remote stop requests
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second identical signal while draining exits the process from inside
//!   the signal handler (status 128 + signal number), so an operator can kill
//!   a drain even when every runtime worker is busy

use std::io;
use std::time::Duration;
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(unix)]
use std::sync::Arc;

use tracing::instrument::WithSubscriber;

use crate::error::{ServerError, ServerResult};
use crate::lifecycle::shutdown::Shutdown;

/// Signals a stop request can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
    Kill,
}

impl StopSignal {
    /// `/stop?hard=true` kills, plain `/stop` interrupts.
    pub const fn from_hard(hard: bool) -> Self {
        if hard {
            Self::Kill
        } else {
            Self::Interrupt
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

/// Pause between answering a stop request and delivering its signal.
pub const STOP_SIGNAL_DELAY: Duration = Duration::from_millis(100);

/// Deliver `signal` to the current process after `delay`, from a new task.
///
/// Fails right away when signals cannot be delivered at all.
pub fn raise_after(signal: StopSignal, delay: Duration) -> ServerResult<()> {
    check_delivery(signal)?;

    tokio::spawn(
        async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = raise(signal) {
                tracing::error!(signal = signal.name(), error = %err, "Stop signal not delivered");
            }
        }
        .with_current_subscriber(),
    );
    Ok(())
}

#[cfg(unix)]
fn check_delivery(signal: StopSignal) -> ServerResult<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::this(), None).map_err(|errno| ServerError::Signal {
        signal: signal.name(),
        source: io::Error::from(errno),
    })
}

#[cfg(not(unix))]
fn check_delivery(signal: StopSignal) -> ServerResult<()> {
    raise(signal)
}

/// Deliver `signal` to the current process.
#[cfg(unix)]
pub fn raise(signal: StopSignal) -> ServerResult<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    tracing::info!(signal = signal.name(), "Delivering stop signal");
    kill(Pid::this(), signal.as_nix()).map_err(|errno| ServerError::Signal {
        signal: signal.name(),
        source: io::Error::from(errno),
    })
}

#[cfg(not(unix))]
pub fn raise(signal: StopSignal) -> ServerResult<()> {
    Err(ServerError::Signal {
        signal: signal.name(),
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "delivering signals to the current process needs a unix platform",
        ),
    })
}

/// What ended the wait in [`SignalListener::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Os(StopSignal),
    Trigger,
}

/// Exit immediately on a signal once its flag is set.
#[cfg(unix)]
#[derive(Debug)]
struct Escape {
    signal: StopSignal,
    armed: Arc<AtomicBool>,
    id: signal_hook::SigId,
}

#[cfg(unix)]
impl Escape {
    fn register(signal: StopSignal) -> ServerResult<Self> {
        let number = signal.as_nix() as i32;
        let armed = Arc::new(AtomicBool::new(false));
        let id = signal_hook::flag::register_conditional_shutdown(number, 128 + number, armed.clone())
            .map_err(|source| ServerError::SignalSubscription {
                signal: signal.name(),
                source,
            })?;
        Ok(Self { signal, armed, id })
    }
}

/// Subscription to the stop signals of one server.
#[derive(Debug)]
pub struct SignalListener {
    shutdown: Shutdown,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    escapes: Vec<Escape>,
}

impl SignalListener {
    /// Subscribe now. Signals arriving from here on are not lost.
    #[cfg(unix)]
    pub fn install(shutdown: Shutdown) -> ServerResult<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt()).map_err(|source| {
            ServerError::SignalSubscription {
                signal: "SIGINT",
                source,
            }
        })?;
        let terminate = signal(SignalKind::terminate()).map_err(|source| {
            ServerError::SignalSubscription {
                signal: "SIGTERM",
                source,
            }
        })?;
        let escapes = vec![
            Escape::register(StopSignal::Interrupt)?,
            Escape::register(StopSignal::Terminate)?,
        ];

        Ok(Self {
            shutdown,
            interrupt,
            terminate,
            escapes,
        })
    }

    #[cfg(not(unix))]
    pub fn install(shutdown: Shutdown) -> ServerResult<Self> {
        Ok(Self { shutdown })
    }

    /// Wait for the first stop event.
    pub async fn recv(&mut self) -> Received {
        #[cfg(unix)]
        {
            tokio::select! {
                Some(()) = self.interrupt.recv() => Received::Os(StopSignal::Interrupt),
                Some(()) = self.terminate.recv() => Received::Os(StopSignal::Terminate),
                _ = self.shutdown.triggered() => Received::Trigger,
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => Received::Os(StopSignal::Interrupt),
                _ = self.shutdown.triggered() => Received::Trigger,
            }
        }
    }

    /// Arm the escape for the signal that was received: the next identical
    /// signal terminates the process without waiting for the drain.
    pub fn rearm(&self, first: Received) {
        #[cfg(unix)]
        if let Received::Os(signal) = first {
            if let Some(escape) = self.escapes.iter().find(|escape| escape.signal == signal) {
                escape.armed.store(true, Ordering::SeqCst);
                tracing::debug!(signal = signal.name(), "Next identical signal terminates");
            }
        }

        #[cfg(not(unix))]
        let _ = first;
    }

    /// Whether the next `signal` exits the process.
    #[cfg(unix)]
    pub fn is_armed(&self, signal: StopSignal) -> bool {
        self.escapes
            .iter()
            .any(|escape| escape.signal == signal && escape.armed.load(Ordering::SeqCst))
    }
}

#[cfg(unix)]
impl Drop for SignalListener {
    fn drop(&mut self) {
        // An armed escape outlives the listener and stays until the process exits.
        for escape in &self.escapes {
            if !escape.armed.load(Ordering::SeqCst) {
                signal_hook::low_level::unregister(escape.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hard_stop_kills() {
        assert_eq!(StopSignal::from_hard(true), StopSignal::Kill);
        assert_eq!(StopSignal::from_hard(false), StopSignal::Interrupt);
        assert_eq!(StopSignal::Kill.name(), "SIGKILL");
    }

    #[tokio::test]
    async fn trigger_ends_wait() {
        let shutdown = Shutdown::new();
        let mut listener = SignalListener::install(shutdown.clone()).unwrap();
        shutdown.trigger();

        let received = tokio::time::timeout(Duration::from_secs(1), listener.recv())
            .await
            .unwrap();
        assert_eq!(received, Received::Trigger);
        listener.rearm(received);
        #[cfg(unix)]
        {
            assert!(!listener.is_armed(StopSignal::Interrupt));
            assert!(!listener.is_armed(StopSignal::Terminate));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rearm_arms_only_the_received_signal() {
        let listener = SignalListener::install(Shutdown::new()).unwrap();
        listener.rearm(Received::Os(StopSignal::Terminate));
        assert!(listener.is_armed(StopSignal::Terminate));
        assert!(!listener.is_armed(StopSignal::Interrupt));
    }
}
