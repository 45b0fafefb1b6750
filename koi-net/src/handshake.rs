use std::sync::Arc;

use tracing::{debug, warn};

use koi_cache::traits::Cache;
use koi_types::bundle::Bundle;
use koi_types::event::{Event, EventType};
use koi_types::rid::{NodeRid, Rid};

use crate::error::NetError;
use crate::identity::NodeIdentity;
use crate::network::outbox::Outbox;
use crate::network::request::RequestHandler;

/// Bootstrap handshake: push `FORGET(self)` then `NEW(self profile)` at a
/// target so any stale record of this node on the peer is reset before the
/// fresh profile lands.
pub struct Handshaker {
    identity: Arc<NodeIdentity>,
    cache: Arc<dyn Cache>,
    outbox: Arc<Outbox>,
    request: Arc<RequestHandler>,
}

impl Handshaker {
    pub fn new(
        identity: Arc<NodeIdentity>,
        cache: Arc<dyn Cache>,
        outbox: Arc<Outbox>,
        request: Arc<RequestHandler>,
    ) -> Self {
        Self {
            identity,
            cache,
            outbox,
            request,
        }
    }

    fn self_bundle(&self) -> Result<Bundle, NetError> {
        // Prefer the cached revision so the published manifest matches what
        // this node already broadcast.
        if let Some(bundle) = self.cache.read(&Rid::Node(self.identity.rid().clone()))? {
            return Ok(bundle);
        }
        self.identity.bundle()
    }

    fn handshake_events(&self) -> Result<Vec<Event>, NetError> {
        Ok(vec![
            Event::from_rid(EventType::Forget, Rid::Node(self.identity.rid().clone())),
            Event::from_bundle(EventType::New, self.self_bundle()?),
        ])
    }

    /// Handshake with a target node.
    ///
    /// A known target goes through the outbox so the handshake keeps FIFO
    /// order with any events already queued for it; an unknown target (the
    /// first contact at bootstrap) is broadcast directly, since no queue
    /// route exists for it yet.
    pub async fn handshake_with(&self, target: &NodeRid) -> Result<(), NetError> {
        debug!(%target, "initiating handshake");
        let events = self.handshake_events()?;

        if self.cache.exists(&Rid::Node(target.clone()))? {
            for event in events {
                if let Err(err) = self.outbox.push_event_to(event, target) {
                    warn!(%target, %err, "failed to queue handshake event");
                    return Err(err);
                }
            }
            Ok(())
        } else {
            self.request.broadcast_events(target, events).await
        }
    }
}
