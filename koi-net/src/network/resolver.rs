use std::sync::Arc;

use tracing::{debug, warn};

use koi_types::bundle::Bundle;
use koi_types::event::Event;
use koi_types::manifest::Manifest;
use koi_types::node::NodeType;
use koi_types::rid::{NodeRid, Rid};

use crate::config::NetConfig;
use crate::graph::{Direction, NetworkGraph};
use crate::identity::NodeIdentity;
use crate::network::request::RequestHandler;

/// Locates state providers and fetches missing knowledge from them.
pub struct NetworkResolver {
    identity: Arc<NodeIdentity>,
    graph: Arc<NetworkGraph>,
    request: Arc<RequestHandler>,
    config: NetConfig,
}

impl NetworkResolver {
    pub fn new(
        identity: Arc<NodeIdentity>,
        graph: Arc<NetworkGraph>,
        request: Arc<RequestHandler>,
        config: NetConfig,
    ) -> Self {
        Self {
            identity,
            graph,
            request,
            config,
        }
    }

    fn providers_for(&self, rid: &Rid) -> Vec<NodeRid> {
        match self.graph.get_state_providers(&rid.rid_type()) {
            Ok(providers) => providers
                .into_iter()
                .filter(|p| p != self.identity.rid())
                .collect(),
            Err(err) => {
                warn!(%err, "failed to list state providers");
                Vec::new()
            }
        }
    }

    /// Ask state providers for the manifest of a RID, first hit wins.
    pub async fn fetch_remote_manifest(&self, rid: &Rid) -> Option<Manifest> {
        for provider in self.providers_for(rid) {
            match self
                .request
                .fetch_manifests(&provider, Vec::new(), vec![rid.clone()])
                .await
            {
                Ok(payload) => {
                    if let Some(manifest) =
                        payload.manifests.into_iter().find(|m| &m.rid == rid)
                    {
                        debug!(%rid, %provider, "fetched remote manifest");
                        return Some(manifest);
                    }
                }
                Err(err) => {
                    debug!(%provider, %err, "manifest fetch failed, trying next provider");
                }
            }
        }
        debug!(%rid, "no provider had the manifest");
        None
    }

    /// Ask state providers for the full bundle of a RID, first hit wins.
    pub async fn fetch_remote_bundle(&self, rid: &Rid) -> Option<Bundle> {
        for provider in self.providers_for(rid) {
            match self.request.fetch_bundles(&provider, vec![rid.clone()]).await {
                Ok(payload) => {
                    if let Some(bundle) = payload.bundles.into_iter().find(|b| b.rid() == rid) {
                        debug!(%rid, %provider, "fetched remote bundle");
                        return Some(bundle);
                    }
                }
                Err(err) => {
                    debug!(%provider, %err, "bundle fetch failed, trying next provider");
                }
            }
        }
        debug!(%rid, "no provider had the bundle");
        None
    }

    /// Poll every in-neighbor (or the first contact while there are none)
    /// for buffered events.
    pub async fn poll_neighbors(&self) -> Vec<(NodeRid, Vec<Event>)> {
        let mut neighbors = self.graph.get_neighbors(Direction::In, None);
        if neighbors.is_empty() {
            if let Some(first_contact) = &self.config.first_contact {
                neighbors.push(first_contact.rid.clone());
            }
        }

        let mut collected = Vec::new();
        for peer in neighbors {
            // Only full nodes can be polled; unknown peers (the first
            // contact before its profile lands) are still attempted.
            if let Ok(Some(profile)) = self.graph.get_node_profile(&peer) {
                if profile.node_type != NodeType::Full {
                    continue;
                }
            }
            match self.request.poll_events(&peer, 0).await {
                Ok(payload) => {
                    if !payload.events.is_empty() {
                        debug!(count = payload.events.len(), %peer, "received events");
                    }
                    collected.push((peer, payload.events));
                }
                Err(err) => {
                    debug!(%peer, %err, "poll failed");
                }
            }
        }
        collected
    }
}
