use std::sync::Arc;

use tracing::debug;

use koi_types::edge::EdgeType;
use koi_types::event::Event;
use koi_types::node::NodeType;
use koi_types::rid::NodeRid;

use crate::error::NetError;
use crate::graph::NetworkGraph;
use crate::identity::NodeIdentity;
use crate::network::event_queue::EventQueue;
use crate::network::poll_buffer::PollEventBuffer;

/// Routes outbound events onto the right per-peer queue.
///
/// An approved edge `self → peer` dictates the delivery discipline; absent
/// one, the peer's node type decides (full ⇒ webhook, partial ⇒ poll).
pub struct Outbox {
    identity: Arc<NodeIdentity>,
    graph: Arc<NetworkGraph>,
    webhook_queue: Arc<EventQueue>,
    poll_buffer: Arc<PollEventBuffer>,
}

impl Outbox {
    pub fn new(
        identity: Arc<NodeIdentity>,
        graph: Arc<NetworkGraph>,
        webhook_queue: Arc<EventQueue>,
        poll_buffer: Arc<PollEventBuffer>,
    ) -> Self {
        Self {
            identity,
            graph,
            webhook_queue,
            poll_buffer,
        }
    }

    fn delivery_for(&self, node: &NodeRid) -> Result<EdgeType, NetError> {
        if let Some(edge) = self.graph.get_edge_profile(self.identity.rid(), node) {
            if edge.status == koi_types::edge::EdgeStatus::Approved {
                return Ok(edge.edge_type);
            }
        }
        let profile = self
            .graph
            .get_node_profile(node)?
            .ok_or_else(|| NetError::NodeNotFound {
                node: node.to_string(),
            })?;
        Ok(match profile.node_type {
            NodeType::Full => EdgeType::Webhook,
            NodeType::Partial => EdgeType::Poll,
        })
    }

    /// Queue an event toward a peer.
    pub fn push_event_to(&self, event: Event, node: &NodeRid) -> Result<(), NetError> {
        let delivery = self.delivery_for(node)?;
        debug!(%node, ?delivery, rid = %event.rid, "queueing outbound event");
        match delivery {
            EdgeType::Webhook => self.webhook_queue.push(node, event),
            EdgeType::Poll => self.poll_buffer.push(node, event),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koi_cache::memory::MemoryCache;
    use koi_cache::traits::Cache;
    use koi_crypto::keys::Keypair;
    use koi_types::bundle::Bundle;
    use koi_types::edge::{EdgeProfile, EdgeStatus};
    use koi_types::event::EventType;
    use koi_types::node::{NodeProfile, NodeProvides};
    use koi_types::rid::{EdgeRid, Rid, RidType};
    use serde_json::json;

    struct Fixture {
        cache: Arc<MemoryCache>,
        identity: Arc<NodeIdentity>,
        graph: Arc<NetworkGraph>,
        webhook_queue: Arc<EventQueue>,
        poll_buffer: Arc<PollEventBuffer>,
        outbox: Outbox,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let identity = Arc::new(
            NodeIdentity::new(
                "me",
                Keypair::generate(),
                NodeProfile {
                    base_url: Some("http://me.test".to_string()),
                    node_type: NodeType::Full,
                    provides: NodeProvides::default(),
                    public_key: String::new(),
                },
            )
            .unwrap(),
        );
        cache.write(&identity.bundle().unwrap()).unwrap();
        let graph = Arc::new(NetworkGraph::new(
            Arc::clone(&cache) as Arc<dyn Cache>,
            identity.rid().clone(),
        ));
        let (webhook_queue, _rx) = EventQueue::new();
        let webhook_queue = Arc::new(webhook_queue);
        let poll_buffer = Arc::new(PollEventBuffer::new());
        let outbox = Outbox::new(
            Arc::clone(&identity),
            Arc::clone(&graph),
            Arc::clone(&webhook_queue),
            Arc::clone(&poll_buffer),
        );
        Fixture {
            cache,
            identity,
            graph,
            webhook_queue,
            poll_buffer,
            outbox,
        }
    }

    fn write_peer(fixture: &Fixture, name: &str, node_type: NodeType) -> NodeRid {
        let rid = NodeRid {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
        };
        let profile = NodeProfile {
            base_url: match node_type {
                NodeType::Full => Some(format!("http://{name}.test")),
                NodeType::Partial => None,
            },
            node_type,
            provides: NodeProvides::default(),
            public_key: "AA".to_string(),
        };
        fixture
            .cache
            .write(&Bundle::generate(
                Rid::Node(rid.clone()),
                serde_json::to_value(&profile).unwrap(),
            ))
            .unwrap();
        rid
    }

    fn write_edge(fixture: &Fixture, target: &NodeRid, edge_type: EdgeType, status: EdgeStatus) {
        let profile = EdgeProfile {
            source: fixture.identity.rid().clone(),
            target: target.clone(),
            edge_type,
            rid_types: vec![RidType::Node],
            status,
        };
        fixture
            .cache
            .write(&Bundle::generate(
                Rid::Edge(EdgeRid::generate("me->peer")),
                serde_json::to_value(&profile).unwrap(),
            ))
            .unwrap();
    }

    fn event() -> Event {
        Event::from_rid(EventType::Update, "orn:example.doc:a".parse().unwrap())
    }

    #[test]
    fn test_full_node_defaults_to_webhook() {
        let fixture = fixture();
        let peer = write_peer(&fixture, "peer", NodeType::Full);
        fixture.graph.generate().unwrap();

        fixture.outbox.push_event_to(event(), &peer).unwrap();
        assert_eq!(fixture.webhook_queue.len(&peer), 1);
        assert!(fixture.poll_buffer.is_empty(&peer));
    }

    #[test]
    fn test_partial_node_defaults_to_poll() {
        let fixture = fixture();
        let peer = write_peer(&fixture, "peer", NodeType::Partial);
        fixture.graph.generate().unwrap();

        fixture.outbox.push_event_to(event(), &peer).unwrap();
        assert_eq!(fixture.poll_buffer.len(&peer), 1);
        assert!(fixture.webhook_queue.is_empty(&peer));
    }

    #[test]
    fn test_approved_edge_overrides_node_type() {
        let fixture = fixture();
        let peer = write_peer(&fixture, "peer", NodeType::Full);
        write_edge(&fixture, &peer, EdgeType::Poll, EdgeStatus::Approved);
        fixture.graph.generate().unwrap();

        fixture.outbox.push_event_to(event(), &peer).unwrap();
        assert_eq!(fixture.poll_buffer.len(&peer), 1);
    }

    #[test]
    fn test_proposed_edge_falls_back_to_node_type() {
        let fixture = fixture();
        let peer = write_peer(&fixture, "peer", NodeType::Full);
        write_edge(&fixture, &peer, EdgeType::Poll, EdgeStatus::Proposed);
        fixture.graph.generate().unwrap();

        fixture.outbox.push_event_to(event(), &peer).unwrap();
        assert_eq!(fixture.webhook_queue.len(&peer), 1);
    }

    #[test]
    fn test_unknown_peer_errors() {
        let fixture = fixture();
        let ghost = NodeRid {
            name: "ghost".to_string(),
            uuid: "ghost-uuid".to_string(),
        };
        assert!(matches!(
            fixture.outbox.push_event_to(event(), &ghost),
            Err(NetError::NodeNotFound { .. })
        ));
    }
}
