use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use koi_types::event::Event;
use koi_types::rid::NodeRid;

/// Per-peer FIFO of events awaiting pickup by polling peers. Appended to by
/// the pipeline, drained by the peer's `/events/poll` requests; there is no
/// delivery worker on this path.
#[derive(Default)]
pub struct PollEventBuffer {
    buffers: Mutex<HashMap<NodeRid, VecDeque<Event>>>,
}

impl PollEventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to a peer's buffer.
    pub fn push(&self, node: &NodeRid, event: Event) {
        let mut buffers = self.buffers.lock().expect("poll buffer lock poisoned");
        buffers.entry(node.clone()).or_default().push_back(event);
    }

    /// Drain up to `limit` events for a peer (0 = everything), leaving the
    /// tail for the next poll.
    pub fn drain(&self, node: &NodeRid, limit: usize) -> Vec<Event> {
        let mut buffers = self.buffers.lock().expect("poll buffer lock poisoned");
        let Some(buffer) = buffers.get_mut(node) else {
            return Vec::new();
        };

        let take = if limit == 0 || limit >= buffer.len() {
            buffer.len()
        } else {
            limit
        };
        let drained = buffer.drain(..take).collect();
        if buffer.is_empty() {
            buffers.remove(node);
        }
        drained
    }

    /// Number of events queued for a peer.
    pub fn len(&self, node: &NodeRid) -> usize {
        let buffers = self.buffers.lock().expect("poll buffer lock poisoned");
        buffers.get(node).map(|b| b.len()).unwrap_or(0)
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

    #[test]
    fn test_drain_all_without_limit() {
        let buffer = PollEventBuffer::new();
        let peer = node("a");
        for n in 0..3 {
            buffer.push(&peer, event(n));
        }
        let drained = buffer.drain(&peer, 0);
        assert_eq!(drained.len(), 3);
        assert!(buffer.is_empty(&peer));
    }

    #[test]
    fn test_limit_returns_prefix_and_keeps_tail() {
        let buffer = PollEventBuffer::new();
        let peer = node("a");
        for n in 0..250 {
            buffer.push(&peer, event(n));
        }

        let first = buffer.drain(&peer, 100);
        assert_eq!(first.len(), 100);
        assert_eq!(first[0], event(0));
        assert_eq!(first[99], event(99));
        assert_eq!(buffer.len(&peer), 150);

        let second = buffer.drain(&peer, 100);
        assert_eq!(second[0], event(100));
        assert_eq!(second[99], event(199));
        assert_eq!(buffer.len(&peer), 50);
    }

    #[test]
    fn test_buffers_are_per_peer() {
        let buffer = PollEventBuffer::new();
        buffer.push(&node("a"), event(1));
        buffer.push(&node("b"), event(2));

        assert_eq!(buffer.drain(&node("a"), 0), vec![event(1)]);
        assert_eq!(buffer.len(&node("b")), 1);
    }

    #[test]
    fn test_drain_unknown_peer_is_empty() {
        let buffer = PollEventBuffer::new();
        assert!(buffer.drain(&node("nobody"), 0).is_empty());
    }
}
