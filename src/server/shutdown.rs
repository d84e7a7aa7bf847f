use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Requests a graceful stop of a running [`Server`](crate::server::Server).
///
/// The handle can be cloned and sent to other threads (a signal handler,
/// a test). Triggering it sets a flag and wakes the poller so the event
/// loop notices within one iteration; the loop then releases every socket
/// exactly once.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        }
    }

    /// Asks the event loop to stop. Repeated calls are no-ops.
    pub fn trigger(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutdown requested");
        if let Err(e) = self.waker.wake() {
            // The loop still sees the flag after its current poll timeout
            warn!(error = %e, "Failed to wake the event loop");
        }
    }

    /// Returns true once [`trigger`](Self::trigger) has been called.
    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
