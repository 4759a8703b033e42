//! C8 — CDC Fan-out: one multicast sink per table (spec §4.7).
//!
//! Sinks are created lazily on first subscribe and retired once their last
//! subscriber drops, mirroring the teacher's lazy-worker-per-rule pattern in
//! `src/streams/replication.rs`. Subscriber counts are tracked explicitly
//! rather than derived from `broadcast::Sender::receiver_count` so a sink
//! mid-retirement can't race a fresh subscriber into believing it is live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::cdc::CdcEvent;

const SINK_CAPACITY: usize = 1024;

struct Sink {
    tx: broadcast::Sender<CdcEvent>,
    subscribers: AtomicUsize,
}

/// A live per-table subscription. Decrements the sink's subscriber count
/// (and retires the sink if it was the last one) on drop.
pub struct Subscription {
    registry: Arc<FanoutRegistry>,
    table: String,
    rx: broadcast::Receiver<CdcEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<CdcEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // A slow subscriber fell behind the ring buffer; resume from
                // the next available event rather than terminating it.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release(&self.table);
    }
}

/// Per-table multicast registry. One [`FanoutRegistry`] is shared by the CDC
/// listener (publisher) and every live WebSocket subscription (consumers).
#[derive(Default)]
pub struct FanoutRegistry {
    sinks: RwLock<HashMap<String, Sink>>,
}

impl FanoutRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publishes `event` to the sink for its table, if one exists. No sink
    /// means no subscriber has ever asked for this table — the event is
    /// dropped, not buffered, matching "fan-out has no replay memory" (§4.7).
    pub fn publish(&self, event: CdcEvent) {
        let Some(table) = event.table() else { return };
        let sinks = self.sinks.read();
        if let Some(sink) = sinks.get(table) {
            // No receivers yet is not an error; the event is simply unread.
            let _ = sink.tx.send(event);
        }
    }

    /// Subscribes to `table`, creating its sink on first use.
    pub fn subscribe(self: &Arc<Self>, table: &str) -> Subscription {
        let rx = {
            let sinks = self.sinks.read();
            if let Some(sink) = sinks.get(table) {
                sink.subscribers.fetch_add(1, Ordering::SeqCst);
                sink.tx.subscribe()
            } else {
                drop(sinks);
                let mut sinks = self.sinks.write();
                // Another writer may have created it between the read-unlock
                // and this write-lock acquisition.
                if let Some(sink) = sinks.get(table) {
                    sink.subscribers.fetch_add(1, Ordering::SeqCst);
                    sink.tx.subscribe()
                } else {
                    let (tx, rx) = broadcast::channel(SINK_CAPACITY);
                    let sink = Sink { tx, subscribers: AtomicUsize::new(1) };
                    sinks.insert(table.to_string(), sink);
                    rx
                }
            }
        };
        Subscription { registry: Arc::clone(self), table: table.to_string(), rx }
    }

    fn release(&self, table: &str) {
        let mut sinks = self.sinks.write();
        let retire = match sinks.get(table) {
            Some(sink) => sink.subscribers.fetch_sub(1, Ordering::SeqCst) == 1,
            None => false,
        };
        if retire {
            sinks.remove(table);
        }
    }

    /// Number of live subscribers for `table`, for observability/tests.
    pub fn subscriber_count(&self, table: &str) -> usize {
        self.sinks
            .read()
            .get(table)
            .map(|sink| sink.subscribers.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_event(table: &str) -> CdcEvent {
        CdcEvent::Insert {
            lsn: 1,
            timestamp: 0,
            schema: "public".into(),
            table: table.into(),
            row: vec![],
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let registry = FanoutRegistry::new();
        let mut sub = registry.subscribe("orders");
        registry.publish(insert_event("orders"));
        let event = sub.recv().await.expect("event");
        assert_eq!(event.table(), Some("orders"));
    }

    #[tokio::test]
    async fn publish_with_no_subscriber_is_dropped_silently() {
        let registry = FanoutRegistry::new();
        registry.publish(insert_event("orders"));
        assert_eq!(registry.subscriber_count("orders"), 0);
    }

    #[tokio::test]
    async fn sink_is_retired_after_last_subscriber_drops() {
        let registry = FanoutRegistry::new();
        let sub = registry.subscribe("orders");
        assert_eq!(registry.subscriber_count("orders"), 1);
        drop(sub);
        assert_eq!(registry.subscriber_count("orders"), 0);
    }

    #[tokio::test]
    async fn two_subscribers_both_receive_the_same_event() {
        let registry = FanoutRegistry::new();
        let mut a = registry.subscribe("orders");
        let mut b = registry.subscribe("orders");
        registry.publish(insert_event("orders"));
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }
}
