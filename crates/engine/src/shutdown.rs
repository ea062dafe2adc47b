//! Cooperative shutdown signal shared by the Spawner and Prioritizer loops.
//!
//! Backed by a `watch` channel rather than an `AtomicBool` + `Notify` pair:
//! a `watch::Receiver` naturally answers "has this already happened?" for a
//! handle created after the fact, which a `Notify` does not.

use tokio::sync::watch;

/// Owned by the binary; call `request()` once a SIGINT/SIGTERM has been
/// observed.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Cloneable, handed to each daemon loop and to the child-supervision code.
#[derive(Clone)]
pub struct ShutdownHandle {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownHandle { rx })
    }

    /// Idempotent: a second call is a no-op.
    pub fn request(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new().0
    }
}

impl ShutdownHandle {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves immediately if shutdown was already requested; otherwise
    /// waits for the next `request()` call. Safe to race against in
    /// `tokio::select!` inside a loop.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}
