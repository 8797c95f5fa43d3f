//! Live notification streams with an explicit unsubscribe handle.

use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// A stream of notifications. The subscription ends when `unsubscribe` is called or the value is
/// dropped; either way the producer is told to stop.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            receiver,
            on_unsubscribe: None,
        }
    }

    /// Registers `f` to run exactly once when the subscription ends.
    pub fn on_unsubscribe(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(f));
        self
    }

    /// Waits for the next notification. Returns `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns a notification if one is already waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        self.receiver.close();
        if let Some(f) = self.on_unsubscribe.take() {
            f();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Fans one stream of values out to any number of subscribers. Subscribers that have gone away
/// are dropped on the next `notify`.
pub(crate) struct Notifier<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Notifier<T>
where
    T: Clone,
{
    /// Adds a subscriber whose first notification is `current`.
    pub(crate) fn subscribe(&self, current: T) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(current);
        self.lock().push(sender);
        Subscription::new(receiver)
    }

    pub(crate) fn notify(&self, value: T) {
        let mut senders = self.lock();
        senders.retain(|sender| sender.send(value.clone()).is_ok());
        trace!("Notified {} subscriber(s)", senders.len());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        // a panic while holding this lock cannot leave the list half-updated
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_notifier_delivers_current_then_updates() {
        let notifier = Notifier::default();
        let mut sub = notifier.subscribe(1);
        notifier.notify(2);
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let notifier = Notifier::default();
        let sub = notifier.subscribe("a");
        drop(sub);
        notifier.notify("b");
        assert!(notifier.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let (_sender, receiver) = mpsc::unbounded_channel::<()>();
        let counter = count.clone();
        let sub = Subscription::new(receiver).on_unsubscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
