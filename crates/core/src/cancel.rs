//! Cooperative cancellation token threaded through every operation that may
//! perform I/O (filesystem reads, repository calls, embedder calls, channel
//! sends/receives, timer waits).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once `cancel()` has been called. A no-op if already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }

    /// Runs `on_cancel` as soon as cancellation is observed, on a background task.
    pub fn on_cancel<F: FnOnce() + Send + 'static>(&self, on_cancel: F) {
        let token = self.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            on_cancel();
        });
    }
}
