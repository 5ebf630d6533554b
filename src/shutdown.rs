//! Cooperative cancellation for ingestion runs.
//!
//! A [`ShutdownSignal`] is shared between the Ctrl+C handler and every
//! partition worker. Workers poll it at the top of each page iteration and
//! race it against backoff sleeps; nothing is aborted mid-request.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown signal.
pub type SharedShutdown = Arc<ShutdownSignal>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register the process-wide signal. Later registrations are ignored.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Process-wide signal registered by the binary, if any.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// One-shot cancellation flag with async wakeups.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unset signal wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request cancellation. Only the first call wakes waiters.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent
        // request between the check and the await is not missed.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
