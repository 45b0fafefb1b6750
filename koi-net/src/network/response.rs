use std::sync::Arc;

use tracing::debug;

use koi_cache::traits::Cache;
use koi_types::rid::{NodeRid, Rid};

use crate::error::NetError;
use crate::network::poll_buffer::PollEventBuffer;
use crate::processor::kobj::KnowledgeSource;
use crate::processor::queue::KobjQueue;
use crate::protocol::{
    BundlesPayload, EventsPayload, FetchBundles, FetchManifests, FetchRids, ManifestsPayload,
    PollEvents, RidsPayload,
};

/// Inbound RPC logic for the five protocol endpoints, decoupled from the
/// HTTP layer. Handlers only enqueue work or read the cache; all mutation
/// stays on the knowledge worker.
pub struct ResponseHandler {
    cache: Arc<dyn Cache>,
    kobj_queue: KobjQueue,
    poll_buffer: Arc<PollEventBuffer>,
}

impl ResponseHandler {
    pub fn new(
        cache: Arc<dyn Cache>,
        kobj_queue: KobjQueue,
        poll_buffer: Arc<PollEventBuffer>,
    ) -> Self {
        Self {
            cache,
            kobj_queue,
            poll_buffer,
        }
    }

    /// Queue every broadcast event for pipeline processing.
    pub fn broadcast_events(&self, source: &NodeRid, payload: EventsPayload) {
        debug!(count = payload.events.len(), %source, "received broadcast");
        for event in payload.events {
            self.kobj_queue.push_event(
                event,
                KnowledgeSource::External {
                    peer: source.clone(),
                },
            );
        }
    }

    /// Drain the requesting node's poll buffer.
    pub fn poll_events(&self, req: PollEvents) -> EventsPayload {
        let events = self.poll_buffer.drain(&req.rid, req.limit);
        debug!(count = events.len(), node = %req.rid, "drained poll buffer");
        EventsPayload { events }
    }

    pub fn fetch_rids(&self, req: FetchRids) -> Result<RidsPayload, NetError> {
        let rids = self.cache.list_rids(&req.rid_types)?;
        Ok(RidsPayload { rids })
    }

    pub fn fetch_manifests(&self, req: FetchManifests) -> Result<ManifestsPayload, NetError> {
        let rids: Vec<Rid> = if req.rids.is_empty() {
            self.cache.list_rids(&req.rid_types)?
        } else {
            req.rids
        };

        let mut payload = ManifestsPayload::default();
        for rid in rids {
            match self.cache.read(&rid)? {
                Some(bundle) => payload.manifests.push(bundle.manifest),
                None => payload.not_found.push(rid),
            }
        }
        Ok(payload)
    }

    pub fn fetch_bundles(&self, req: FetchBundles) -> Result<BundlesPayload, NetError> {
        let mut payload = BundlesPayload::default();
        for rid in req.rids {
            match self.cache.read(&rid)? {
                Some(bundle) => payload.bundles.push(bundle),
                None => payload.not_found.push(rid),
            }
        }
        Ok(payload)
    }
}
