use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;

use koi_types::event::Event;
use koi_types::rid::NodeRid;

/// Wake-up messages for the event worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookSignal {
    /// Events are pending for this peer.
    Deliver(NodeRid),
    /// Drain nothing further and exit.
    Shutdown,
}

/// Per-peer FIFO of events bound for webhook delivery.
///
/// Pushing an event also signals the worker. Failed batches are put back at
/// the head so per-peer ordering survives requeues.
pub struct EventQueue {
    queues: Mutex<HashMap<NodeRid, VecDeque<Event>>>,
    signal_tx: mpsc::UnboundedSender<WebhookSignal>,
}

impl EventQueue {
    /// Create the queue and the signal receiver its worker will drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WebhookSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        (
            Self {
                queues: Mutex::new(HashMap::new()),
                signal_tx,
            },
            signal_rx,
        )
    }

    /// Append an event for a peer and wake the worker.
    pub fn push(&self, node: &NodeRid, event: Event) {
        {
            let mut queues = self.queues.lock().expect("event queue lock poisoned");
            queues.entry(node.clone()).or_default().push_back(event);
        }
        let _ = self.signal_tx.send(WebhookSignal::Deliver(node.clone()));
    }

    /// Take everything currently queued for a peer.
    pub fn drain(&self, node: &NodeRid) -> Vec<Event> {
        let mut queues = self.queues.lock().expect("event queue lock poisoned");
        queues
            .remove(node)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default()
    }

    /// Put a failed batch back at the head of a peer's queue, in order.
    pub fn requeue_front(&self, node: &NodeRid, events: Vec<Event>) {
        let mut queues = self.queues.lock().expect("event queue lock poisoned");
        let queue = queues.entry(node.clone()).or_default();
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    /// Re-signal delivery for a peer (used for retries).
    pub fn notify(&self, node: &NodeRid) {
        let _ = self.signal_tx.send(WebhookSignal::Deliver(node.clone()));
    }

    /// Push the shutdown sentinel to the worker.
    pub fn shutdown(&self) {
        let _ = self.signal_tx.send(WebhookSignal::Shutdown);
    }

    /// Number of events queued for a peer.
    pub fn len(&self, node: &NodeRid) -> usize {
        let queues = self.queues.lock().expect("event queue lock poisoned");
        queues.get(node).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, node: &NodeRid) -> bool {
        self.len(node) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koi_types::event::EventType;
    use koi_types::rid::Rid;

    fn node(name: &str) -> NodeRid {
        NodeRid {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
        }
    }

    fn event(n: usize) -> Event {
        let rid: Rid = format!("orn:example.doc:{n}").parse().unwrap();
        Event::from_rid(EventType::Update, rid)
    }

    #[tokio::test]
    async fn test_push_signals_worker() {
        let (queue, mut rx) = EventQueue::new();
        let peer = node("a");
        queue.push(&peer, event(1));
        assert_eq!(rx.recv().await, Some(WebhookSignal::Deliver(peer.clone())));
        assert_eq!(queue.drain(&peer), vec![event(1)]);
    }

    #[tokio::test]
    async fn test_fifo_preserved_across_requeue() {
        let (queue, _rx) = EventQueue::new();
        let peer = node("a");
        for n in 0..5 {
            queue.push(&peer, event(n));
        }

        // Worker takes a batch, fails, and requeues it while new events
        // arrived behind it.
        let batch = queue.drain(&peer);
        assert_eq!(batch.len(), 5);
        queue.push(&peer, event(5));
        queue.requeue_front(&peer, batch);

        let all = queue.drain(&peer);
        let expected: Vec<Event> = (0..6).map(event).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (queue, mut rx) = EventQueue::new();
        queue.shutdown();
        assert_eq!(rx.recv().await, Some(WebhookSignal::Shutdown));
    }

    #[tokio::test]
    async fn test_drain_removes_queue() {
        let (queue, _rx) = EventQueue::new();
        let peer = node("a");
        queue.push(&peer, event(1));
        assert_eq!(queue.len(&peer), 1);
        queue.drain(&peer);
        assert!(queue.is_empty(&peer));
        assert!(queue.drain(&peer).is_empty());
    }
}
