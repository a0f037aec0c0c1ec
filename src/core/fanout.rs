//! # Bounded fan-out to per-listener queues.
//!
//! [`Fanout`] is the delivery primitive shared by parameter subscriptions and
//! telemetry. Each listener owns a bounded `mpsc` queue; [`Fanout::emit`] uses
//! `try_send` so the producer (the socket read loop) never waits on a consumer.
//!
//! ## Rules
//! - A full queue drops the item **for that listener only**; the count is returned
//!   so the caller can publish an overflow event.
//! - Listeners whose receiver was dropped are pruned on the next emit.
//! - Per-listener FIFO.

use tokio::sync::mpsc;

/// Set of listener queues keyed by a caller-chosen id.
pub(crate) struct Fanout<T> {
    sinks: Vec<(u64, mpsc::Sender<T>)>,
}

impl<T: Clone> Fanout<T> {
    pub(crate) fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds a listener queue of `capacity` (min 1) and returns its receiver.
    pub(crate) fn attach(&mut self, id: u64, capacity: usize) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.sinks.push((id, tx));
        rx
    }

    /// Removes the listener; closing its queue. Returns `false` if unknown.
    pub(crate) fn detach(&mut self, id: u64) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|(sink_id, _)| *sink_id != id);
        self.sinks.len() != before
    }

    /// Offers `item` to one listener only. Returns `false` if it was not queued.
    pub(crate) fn send_to(&self, id: u64, item: &T) -> bool {
        self.sinks
            .iter()
            .find(|(sink_id, _)| *sink_id == id)
            .is_some_and(|(_, tx)| tx.try_send(item.clone()).is_ok())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Offers `item` to every listener; returns how many queues were full.
    pub(crate) fn emit(&mut self, item: &T) -> usize {
        let mut full = 0;
        self.sinks.retain(|(_, tx)| match tx.try_send(item.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                full += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_listener_receives_in_order() {
        let mut fanout = Fanout::new();
        let mut a = fanout.attach(1, 4);
        let mut b = fanout.attach(2, 4);

        assert_eq!(fanout.emit(&10), 0);
        assert_eq!(fanout.emit(&11), 0);

        assert_eq!(a.recv().await, Some(10));
        assert_eq!(a.recv().await, Some(11));
        assert_eq!(b.recv().await, Some(10));
        assert_eq!(b.recv().await, Some(11));
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_listener_only() {
        let mut fanout = Fanout::new();
        let mut slow = fanout.attach(1, 1);
        let mut fast = fanout.attach(2, 8);

        assert_eq!(fanout.emit(&"a"), 0);
        assert_eq!(fanout.emit(&"b"), 1);

        assert_eq!(slow.recv().await, Some("a"));
        assert!(slow.try_recv().is_err());
        assert_eq!(fast.recv().await, Some("a"));
        assert_eq!(fast.recv().await, Some("b"));
    }

    #[tokio::test]
    async fn test_send_to_targets_one_listener() {
        let mut fanout = Fanout::new();
        let mut a = fanout.attach(1, 2);
        let mut b = fanout.attach(2, 2);

        assert!(fanout.send_to(2, &"cached"));
        assert!(!fanout.send_to(3, &"nobody"));
        assert_eq!(b.recv().await, Some("cached"));
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_closed_listener_is_pruned() {
        let mut fanout = Fanout::<u8>::new();
        let rx = fanout.attach(1, 1);
        let _keep = fanout.attach(2, 1);
        drop(rx);

        fanout.emit(&1);
        assert_eq!(fanout.len(), 1);
    }

    #[tokio::test]
    async fn test_detach_closes_queue() {
        let mut fanout = Fanout::<u8>::new();
        let mut rx = fanout.attach(9, 1);
        assert!(fanout.detach(9));
        assert!(!fanout.detach(9));
        assert_eq!(rx.recv().await, None);
    }
}
