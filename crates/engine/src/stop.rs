use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Cooperative stop flag shared between the control plane and the tick
/// loop. Triggering is idempotent and wakes every waiter.
#[derive(Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until triggered. Returns immediately if it already was.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before re-checking the flag so a trigger
        // between the check and the await cannot be missed.
        notified.as_mut().enable();
        if self.triggered() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration` unless triggered first. Returns `false` when
    /// interrupted by a trigger.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
