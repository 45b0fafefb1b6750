use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use koi_cache::traits::Cache;
use koi_types::event::Event;
use koi_types::node::{NodeProfile, NodeType};
use koi_types::rid::{NodeRid, Rid, RidType};

use crate::config::NetConfig;
use crate::error::NetError;
use crate::identity::NodeIdentity;
use crate::protocol::{
    BundlesPayload, ErrorResponse, EventsPayload, FetchBundles, FetchManifests, FetchRids,
    ManifestsPayload, PollEvents, ProtocolPayload, RidsPayload, SignedEnvelope,
    BROADCAST_EVENTS_PATH, FETCH_BUNDLES_PATH, FETCH_MANIFESTS_PATH, FETCH_RIDS_PATH,
    POLL_EVENTS_PATH, TIMESTAMP_HEADER,
};
use crate::secure::SecureLayer;

/// Outbound signed RPC client for the five protocol endpoints.
pub struct RequestHandler {
    cache: Arc<dyn Cache>,
    identity: Arc<NodeIdentity>,
    secure: Arc<SecureLayer>,
    config: NetConfig,
    client: reqwest::Client,
}

impl RequestHandler {
    pub fn new(
        cache: Arc<dyn Cache>,
        identity: Arc<NodeIdentity>,
        secure: Arc<SecureLayer>,
        config: NetConfig,
    ) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            cache,
            identity,
            secure,
            config,
            client,
        })
    }

    /// Resolve a node RID to its base URL: from the cached profile, or from
    /// the configured first contact when the RID matches it.
    pub fn resolve_base_url(&self, node: &NodeRid) -> Result<String, NetError> {
        if let Some(bundle) = self.cache.read(&Rid::Node(node.clone()))? {
            let profile: NodeProfile = bundle.validate_contents()?;
            if profile.node_type != NodeType::Full {
                return Err(NetError::PartialNodeQuery {
                    node: node.to_string(),
                });
            }
            return profile.base_url.ok_or_else(|| NetError::NodeNotFound {
                node: node.to_string(),
            });
        }

        if let Some(first_contact) = &self.config.first_contact {
            if &first_contact.rid == node {
                return Ok(first_contact.url.clone());
            }
        }

        Err(NetError::NodeNotFound {
            node: node.to_string(),
        })
    }

    async fn post_envelope<P: ProtocolPayload>(
        &self,
        node: &NodeRid,
        path: &str,
        payload: P,
    ) -> Result<reqwest::Response, NetError> {
        if node == self.identity.rid() {
            return Err(NetError::SelfRequest);
        }

        let url = format!("{}{}", self.resolve_base_url(node)?, path);
        let envelope = self.secure.create_envelope(payload, node)?;
        debug!(%url, "sending request");

        let response = self
            .client
            .post(&url)
            .header(TIMESTAMP_HEADER, Utc::now().to_rfc3339())
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await?;
            let error: ErrorResponse = serde_json::from_str(&body)?;
            return Err(NetError::Protocol(error.error));
        }
        if !status.is_success() {
            return Err(NetError::Transport {
                reason: format!("unexpected status {status} from {url}"),
            });
        }
        Ok(response)
    }

    /// Send a request and verify its signed response envelope.
    async fn request<P, R>(&self, node: &NodeRid, path: &str, payload: P) -> Result<R, NetError>
    where
        P: ProtocolPayload,
        R: ProtocolPayload + DeserializeOwned,
    {
        let response = self.post_envelope(node, path, payload).await?;
        let body = response.text().await?;
        let envelope: SignedEnvelope<R> = SignedEnvelope::from_json(&body)?;
        self.secure.verify_envelope(&envelope)?;
        Ok(envelope.payload)
    }

    /// Broadcast events to a node. The response carries no payload.
    pub async fn broadcast_events(
        &self,
        node: &NodeRid,
        events: Vec<Event>,
    ) -> Result<(), NetError> {
        let count = events.len();
        self.post_envelope(node, BROADCAST_EVENTS_PATH, EventsPayload { events })
            .await?;
        debug!(%node, count, "broadcast delivered");
        Ok(())
    }

    /// Drain our event buffer held by a node.
    pub async fn poll_events(&self, node: &NodeRid, limit: usize) -> Result<EventsPayload, NetError> {
        let payload = PollEvents {
            rid: self.identity.rid().clone(),
            limit,
        };
        self.request(node, POLL_EVENTS_PATH, payload).await
    }

    pub async fn fetch_rids(
        &self,
        node: &NodeRid,
        rid_types: Vec<RidType>,
    ) -> Result<RidsPayload, NetError> {
        self.request(node, FETCH_RIDS_PATH, FetchRids { rid_types })
            .await
    }

    pub async fn fetch_manifests(
        &self,
        node: &NodeRid,
        rid_types: Vec<RidType>,
        rids: Vec<Rid>,
    ) -> Result<ManifestsPayload, NetError> {
        self.request(node, FETCH_MANIFESTS_PATH, FetchManifests { rid_types, rids })
            .await
    }

    pub async fn fetch_bundles(
        &self,
        node: &NodeRid,
        rids: Vec<Rid>,
    ) -> Result<BundlesPayload, NetError> {
        self.request(node, FETCH_BUNDLES_PATH, FetchBundles { rids })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koi_cache::memory::MemoryCache;
    use koi_crypto::keys::Keypair;
    use koi_types::node::NodeProvides;
    use crate::config::FirstContact;

    fn make_identity(name: &str, node_type: NodeType) -> NodeIdentity {
        let profile = NodeProfile {
            base_url: match node_type {
                NodeType::Full => Some(format!("http://{name}.test")),
                NodeType::Partial => None,
            },
            node_type,
            provides: NodeProvides::default(),
            public_key: String::new(),
        };
        NodeIdentity::new(name, Keypair::generate(), profile).unwrap()
    }

    fn make_handler(cache: Arc<MemoryCache>, config: NetConfig) -> RequestHandler {
        let identity = Arc::new(make_identity("me", NodeType::Full));
        let secure = Arc::new(SecureLayer::new(
            Arc::clone(&identity),
            Arc::clone(&cache) as Arc<dyn Cache>,
            config.max_timestamp_skew,
        ));
        RequestHandler::new(cache as Arc<dyn Cache>, identity, secure, config).unwrap()
    }

    fn cache_profile(cache: &MemoryCache, identity: &NodeIdentity) {
        cache.write(&identity.bundle().unwrap()).unwrap();
    }

    #[test]
    fn test_resolve_url_from_cached_profile() {
        let cache = Arc::new(MemoryCache::new());
        let peer = make_identity("peer", NodeType::Full);
        cache_profile(&cache, &peer);

        let handler = make_handler(cache, NetConfig::default());
        let url = handler.resolve_base_url(peer.rid()).unwrap();
        assert_eq!(url, "http://peer.test");
    }

    #[test]
    fn test_partial_node_unqueryable() {
        let cache = Arc::new(MemoryCache::new());
        let peer = make_identity("peer", NodeType::Partial);
        cache_profile(&cache, &peer);

        let handler = make_handler(cache, NetConfig::default());
        assert!(matches!(
            handler.resolve_base_url(peer.rid()),
            Err(NetError::PartialNodeQuery { .. })
        ));
    }

    #[test]
    fn test_unknown_node_not_found() {
        let handler = make_handler(Arc::new(MemoryCache::new()), NetConfig::default());
        let ghost = make_identity("ghost", NodeType::Full);
        assert!(matches!(
            handler.resolve_base_url(ghost.rid()),
            Err(NetError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_first_contact_url_fallback() {
        let seed = make_identity("seed", NodeType::Full);
        let config = NetConfig {
            first_contact: Some(FirstContact {
                rid: seed.rid().clone(),
                url: "http://seed.test:8000".to_string(),
            }),
            ..NetConfig::default()
        };
        let handler = make_handler(Arc::new(MemoryCache::new()), config);
        assert_eq!(
            handler.resolve_base_url(seed.rid()).unwrap(),
            "http://seed.test:8000"
        );
    }

    #[tokio::test]
    async fn test_self_request_refused() {
        let cache = Arc::new(MemoryCache::new());
        let handler = make_handler(cache, NetConfig::default());
        let self_rid = handler.identity.rid().clone();
        let result = handler.broadcast_events(&self_rid, Vec::new()).await;
        assert!(matches!(result, Err(NetError::SelfRequest)));
    }
}
