//! One-shot "revision changed" signal
//!
//! The signal is allocated lazily by the first waiter and torn down when it
//! fires, so every wait after a firing subscribes to a fresh signal. Firing
//! drops the underlying `watch` sender: a receiver that subscribed before the
//! drop observes the closure even if it starts awaiting afterwards, so no
//! wakeup is lost between releasing the owner's lock and awaiting.

use crate::error::{CtlError, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The owner-side half of the signal. Lives inside the state it guards and
/// is only touched while that state's lock is held.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    tx: Option<watch::Sender<()>>,
}

impl ChangeSignal {
    /// Create a signal with no waiters
    pub fn new() -> Self {
        Self { tx: None }
    }

    /// Register a waiter, creating the signal if nobody is waiting yet
    pub fn subscribe(&mut self) -> ChangeWaiter {
        let tx = self.tx.get_or_insert_with(|| watch::channel(()).0);
        ChangeWaiter { rx: tx.subscribe() }
    }

    /// Wake every current waiter and clear the signal.
    ///
    /// Must be called after the mutation it announces, under the same lock.
    /// Returns whether a signal was armed.
    pub fn fire(&mut self) -> bool {
        self.tx.take().is_some()
    }

    /// Whether some waiter has subscribed since the last firing
    pub fn is_armed(&self) -> bool {
        self.tx.is_some()
    }
}

/// The waiter-side half. Consumed by a single wait.
#[derive(Debug)]
pub struct ChangeWaiter {
    rx: watch::Receiver<()>,
}

impl ChangeWaiter {
    /// Resolve once the signal this waiter subscribed to has fired
    pub async fn fired(mut self) {
        // Nothing is ever sent; the only way out is the sender being dropped.
        while self.rx.changed().await.is_ok() {}
    }

    /// Wait for the signal or for `cancel`, whichever comes first.
    ///
    /// Cancellation wins when both are ready.
    pub async fn fired_or_canceled(self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CtlError::Canceled),
            _ = self.fired() => Ok(()),
        }
    }
}
