//! Sync lifecycle signals
//!
//! Events are broadcast only after the changes they describe have
//! committed to the local store. The initial pull is additionally latched
//! in a watch channel so late subscribers can still wait for it.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

/// Broadcast buffer; slow subscribers see `Lagged` past this
const EVENT_CAPACITY: usize = 64;

/// Events emitted by the sync engines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Every kind finished its first full pull (raised once)
    InitialPullCompleted,
    /// A pull cycle committed
    PullCompleted { applied: usize },
    /// An upload pass finished
    PushCompleted { uploaded: usize, failed: usize },
    /// The very first bootstrap failed entirely
    InitialPullFailed { error: String },
}

/// Handle for raising and observing [`SyncEvent`]s
#[derive(Clone)]
pub struct SyncSignals {
    events: broadcast::Sender<SyncEvent>,
    initial_pull: Arc<watch::Sender<bool>>,
}

impl SyncSignals {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (initial_pull, _) = watch::channel(false);
        Self {
            events,
            initial_pull: Arc::new(initial_pull),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn initial_pull_done(&self) -> bool {
        *self.initial_pull.borrow()
    }

    /// Latch the initial pull and emit its event the first time only
    ///
    /// Returns whether this call did the announcing.
    pub fn announce_initial_pull(&self) -> bool {
        let first = self.initial_pull.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
        if first {
            self.emit(SyncEvent::InitialPullCompleted);
        }
        first
    }

    /// Wait until the initial pull has completed
    pub async fn wait_initial_pull(&self) {
        let mut rx = self.initial_pull.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for SyncSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initial_pull_is_announced_once() {
        let signals = SyncSignals::new();
        let mut rx = signals.subscribe();

        assert!(signals.announce_initial_pull());
        assert!(!signals.announce_initial_pull());
        assert!(signals.initial_pull_done());

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::InitialPullCompleted);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_latched_initial_pull() {
        let signals = SyncSignals::new();
        signals.announce_initial_pull();

        tokio::time::timeout(Duration::from_secs(1), signals.wait_initial_pull())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_announce() {
        let signals = SyncSignals::new();
        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_initial_pull().await })
        };

        tokio::task::yield_now().await;
        signals.announce_initial_pull();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_emit_without_subscribers() {
        let signals = SyncSignals::new();
        signals.emit(SyncEvent::PullCompleted { applied: 3 });
    }
}
