//! Level-triggered notification hook.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// A notification listeners can subscribe to.
///
/// Notifications are level-triggered: a listener that is busy while several calls
/// arrive runs once more afterwards, not once per call.
pub struct Hook {
    tx: watch::Sender<u64>,
}

impl Default for Hook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Notify every subscriber.
    pub fn call(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `listener` after every later notification until the subscription ends.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tap<F, Fut>(&self, mut listener: F) -> Subscription
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Values sent before subscribing count as seen.
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                listener().await;
            }
        });
        Subscription {
            handle: task.abort_handle(),
        }
    }
}

/// Active hook registration. Dropping it unsubscribes.
pub struct Subscription {
    handle: AbortHandle,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.handle.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
