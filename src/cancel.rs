//! Cooperative cancellation for async Session Core operations (§5, §9).
//!
//! A lightweight alternative to `tokio-util`'s `CancellationToken`: cloning
//! shares the same underlying flag, `cancel()` is idempotent, and
//! `cancelled()` resolves immediately if already cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cooperative cancellation signal, cheaply cloneable.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

impl Default for CancelToken {
    fn default() -> Self {
        Self(Arc::new(Inner { cancelled: AtomicBool::new(false), notify: Notify::new() }))
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; wakes any task awaiting `cancelled()`.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancelled; resolves immediately if already cancelled.
    pub async fn cancelled(&self) {
        // Construct the `Notified` future before checking the flag: it
        // snapshots `notify_waiters()`'s epoch at creation, so a `cancel()`
        // landing between the check and the `.await` below still wakes it.
        // Checking first and constructing after would miss that window.
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
