//! Shared plumbing: the cancellation "epoch" token and a thin broadcast
//! wrapper for typed event streams.
//!
//! Ground: `receiver::local_proxy::LocalProxy` signals loop shutdown with a
//! `tokio::sync::watch<bool>`; `[CancelEpoch]` generalizes that into a
//! counter so `refresh()` and `stop()` can be told apart (a refresh wakes a
//! loop without ending it) while keeping the same "await, then check before
//! acting" discipline every suspension point in this crate requires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

/// A cancellable, bumpable cycle counter shared by a loop's task and
/// whatever calls `refresh()`/`stop()` on it.
#[derive(Clone)]
pub struct CancelEpoch {
    epoch: Arc<AtomicU64>,
    wake_tx: watch::Sender<u64>,
}

impl CancelEpoch {
    #[must_use]
    pub fn new() -> Self {
        let (wake_tx, _) = watch::channel(0);
        Self {
            epoch: Arc::new(AtomicU64::new(0)),
            wake_tx,
        }
    }

    /// The epoch in effect right now.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Bumps the epoch and wakes every loop waiting on [`Self::subscribe`].
    /// Used by both `refresh()` (force an immediate cycle) and `stop()`
    /// (end the loop); callers distinguish the two via a separate
    /// `stopped` flag, since the epoch alone only says "something changed".
    pub fn bump(&self) -> u64 {
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.wake_tx.send(next);
        next
    }

    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }

    /// A receiver that resolves `changed()` every time [`Self::bump`] runs.
    /// Multiple bumps before a receiver observes them coalesce into one
    /// wakeup (the `watch` channel only keeps the latest value) — this is
    /// what makes two back-to-back `refresh()` calls produce exactly one
    /// extra cycle rather than two.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.wake_tx.subscribe()
    }
}

impl Default for CancelEpoch {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed broadcast event stream. Thin wrapper so components don't each
/// reach for `tokio::sync::broadcast` directly; ground: `AppState`'s
/// `dashboard_tx` in the teacher's server.
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Publishes an event. A send with no subscribers is a normal outcome
    /// (nobody has to be listening) and is silently discarded.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bump_wakes_a_subscribed_receiver() {
        let epoch = CancelEpoch::new();
        let mut rx = epoch.subscribe();
        let start = epoch.current();
        epoch.bump();
        rx.changed().await.unwrap();
        assert_eq!(epoch.current(), start + 1);
    }

    #[tokio::test]
    async fn two_back_to_back_bumps_coalesce_into_one_wakeup() {
        let epoch = CancelEpoch::new();
        let mut rx = epoch.subscribe();
        epoch.bump();
        epoch.bump();
        rx.changed().await.unwrap();
        assert_eq!(epoch.current(), 2);
        // No further pending change until the next bump.
        assert!(rx.has_changed().is_ok_and(|changed| !changed));
    }

    #[tokio::test]
    async fn event_bus_delivers_to_subscriber() {
        let bus: EventBus<u32> = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(42);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }
}
