//! Cooperative shutdown signal shared by the I/O and controller loops.
//!
//! The flag is an [`AtomicBool`] so loops can poll it without locking;
//! [`ShutdownSignal::cancelled`] lets a loop park in `tokio::select!`
//! until a stop is requested.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-way stop flag with async notification.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes every task waiting in [`ShutdownSignal::cancelled`].
    notify: Notify,
}

impl ShutdownSignal {
    /// Create a signal that has not fired.
    pub const fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            notify: Notify::const_new(),
        }
    }

    /// Request a stop and wake every waiter.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Wait until a stop is requested. Returns immediately if it already
    /// was.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a stop between the
            // check and the await is not missed.
            let notified = self.notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }
}
