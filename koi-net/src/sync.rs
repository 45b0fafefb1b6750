use std::sync::Arc;

use tracing::{debug, warn};

use koi_types::event::EventType;
use koi_types::node::NodeType;
use koi_types::rid::{NodeRid, Rid, RidType};

use crate::graph::{Direction, NetworkGraph};
use crate::identity::NodeIdentity;
use crate::network::request::RequestHandler;
use crate::processor::kobj::KnowledgeSource;
use crate::processor::queue::KobjQueue;

/// Catch-up: reconcile local state against providers by fetching their
/// manifests and feeding them through the pipeline, which deduplicates via
/// the staleness filter.
pub struct SyncManager {
    identity: Arc<NodeIdentity>,
    graph: Arc<NetworkGraph>,
    request: Arc<RequestHandler>,
    kobj_queue: KobjQueue,
}

impl SyncManager {
    pub fn new(
        identity: Arc<NodeIdentity>,
        graph: Arc<NetworkGraph>,
        request: Arc<RequestHandler>,
        kobj_queue: KobjQueue,
    ) -> Self {
        Self {
            identity,
            graph,
            request,
            kobj_queue,
        }
    }

    /// Catch up with every in-neighbor that provides node state.
    pub async fn catch_up_with_providers(&self) -> bool {
        let providers = self
            .graph
            .get_neighbors(Direction::In, Some(&RidType::Node));
        if providers.is_empty() {
            return false;
        }
        debug!(count = providers.len(), "catching up with node providers");
        self.catch_up_with(&providers, &[RidType::Node]).await;
        true
    }

    /// Fetch manifests of the given types from each target and queue them
    /// for processing.
    pub async fn catch_up_with(&self, nodes: &[NodeRid], rid_types: &[RidType]) {
        for node in nodes {
            if node == self.identity.rid() {
                continue;
            }
            match self.graph.get_node_profile(node) {
                Ok(Some(profile)) if profile.node_type == NodeType::Full => {}
                Ok(_) => continue,
                Err(err) => {
                    warn!(%node, %err, "failed to read provider profile");
                    continue;
                }
            }

            let payload = match self
                .request
                .fetch_manifests(node, rid_types.to_vec(), Vec::new())
                .await
            {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%node, %err, "catch-up fetch failed");
                    continue;
                }
            };

            debug!(count = payload.manifests.len(), %node, "queueing fetched manifests");
            for manifest in payload.manifests {
                if manifest.rid == Rid::Node(self.identity.rid().clone()) {
                    continue;
                }
                self.kobj_queue.push_manifest(
                    manifest,
                    Some(EventType::Update),
                    KnowledgeSource::External { peer: node.clone() },
                );
            }
        }
    }
}
