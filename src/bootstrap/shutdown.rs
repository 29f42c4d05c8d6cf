use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Host shutdown state.
///
/// 1. Running - messages are read and dispatched
/// 2. Draining - input is closed, in-flight messages finish
/// 3. Terminated - nothing is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Draining,
    Terminated,
}

/// Why the host stopped reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    EndOfInput,
    Signal,
    Fatal,
}

/// Shared shutdown coordinator for the host loop.
pub struct Shutdown {
    state: watch::Sender<State>,
    reason: watch::Sender<Option<Reason>>,
    in_flight: AtomicU64,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(State::Running);
        let (reason, _) = watch::channel(None);
        Arc::new(Self {
            state,
            reason,
            in_flight: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// First reason given to [`Shutdown::start_drain`].
    pub fn reason(&self) -> Option<Reason> {
        *self.reason.borrow()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == State::Running
    }

    /// Stop accepting input. Later calls keep the first reason.
    pub fn start_drain(&self, reason: Reason) {
        if self.state() != State::Running {
            return;
        }
        self.reason.send_replace(Some(reason));

        let in_flight = self.in_flight();
        info!(?reason, in_flight, "draining in-flight messages");
        self.state.send_replace(State::Draining);
        if in_flight == 0 {
            self.terminate();
        }
    }

    pub fn terminate(&self) {
        if self.state() == State::Terminated {
            return;
        }
        let in_flight = self.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "terminating with messages in flight");
        }
        self.state.send_replace(State::Terminated);
    }

    /// Register a message about to be dispatched. Refused once draining.
    pub fn message_started(&self) -> bool {
        if !self.is_accepting() {
            return false;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn message_finished(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.state() == State::Draining && prev == 1 {
            self.terminate();
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once the state reaches [`State::Terminated`].
    pub async fn terminated(&self) {
        let mut rx = self.subscribe();
        // Only fails if the sender is gone, and `self` holds it.
        let _ = rx.wait_for(|s| *s == State::Terminated).await;
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
