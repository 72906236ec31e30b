//! Pre-stop readiness gate
//!
//! Before the engine starts stopping reels it asks a [`StopGate`] whether every
//! outside obligation is met (sounds loaded, an overlay dismissed, ...). The gate
//! hands back a channel; the engine polls it each tick and proceeds once a
//! message arrives. Only one request is outstanding at a time.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use parking_lot::Mutex;

/// Result of polling a pending gate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoll {
    /// Reels may stop
    Ready,
    /// Still waiting
    Waiting,
}

/// Collaborator deciding when the reels may stop
pub trait StopGate: Send {
    /// Start a readiness request; the receiver yields once reels may stop.
    fn request(&mut self) -> Receiver<()>;
}

/// Poll a request receiver without blocking.
///
/// A gate that went away without answering counts as ready, so a dropped
/// collaborator never leaves the reels spinning forever.
pub fn poll(receiver: &Receiver<()>) -> GatePoll {
    match receiver.try_recv() {
        Ok(()) => GatePoll::Ready,
        Err(TryRecvError::Empty) => GatePoll::Waiting,
        Err(TryRecvError::Disconnected) => {
            log::warn!("stop gate disconnected, continuing");
            GatePoll::Ready
        }
    }
}

/// Gate that is always ready
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl StopGate for OpenGate {
    fn request(&mut self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        // Cannot fail: the receiver is alive and the slot is free
        let _ = tx.send(());
        rx
    }
}

#[derive(Debug, Default)]
struct GateState {
    pending: Option<Sender<()>>,
    requests: u64,
}

/// Gate released explicitly through its [`GateHandle`]
#[derive(Debug)]
pub struct ReadyGate {
    state: Arc<Mutex<GateState>>,
}

/// Releasing side of a [`ReadyGate`], safe to move to another thread
#[derive(Debug, Clone)]
pub struct GateHandle {
    state: Arc<Mutex<GateState>>,
}

impl ReadyGate {
    pub fn new() -> (Self, GateHandle) {
        let state = Arc::new(Mutex::new(GateState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            GateHandle { state },
        )
    }
}

impl StopGate for ReadyGate {
    fn request(&mut self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        let mut state = self.state.lock();
        state.pending = Some(tx);
        state.requests += 1;
        rx
    }
}

impl GateHandle {
    /// A request is waiting to be released
    pub fn is_waiting(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Release the outstanding request. Returns false when nothing was waiting.
    pub fn release(&self) -> bool {
        match self.state.lock().pending.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Requests made so far
    pub fn requests(&self) -> u64 {
        self.state.lock().requests
    }
}
