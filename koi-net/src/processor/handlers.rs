use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use koi_crypto::keys::fingerprint_der_b64;
use koi_types::bundle::Bundle;
use koi_types::edge::{EdgeProfile, EdgeStatus};
use koi_types::event::{Event, EventType};
use koi_types::node::NodeProfile;
use koi_types::rid::{Rid, RidType};

use crate::error::NetError;
use crate::graph::Direction;
use crate::processor::context::HandlerContext;
use crate::processor::kobj::{KnowledgeObject, KnowledgeSource};
use crate::processor::pipeline::{
    HandlerFilter, HandlerOutcome, HandlerStage, KnowledgeHandler,
};

/// The built-in admission, negotiation, and propagation handlers, in
/// registration order.
pub fn default_handlers() -> Vec<Box<dyn KnowledgeHandler>> {
    vec![
        Box::new(BasicRidFilter),
        Box::new(BasicManifestFilter),
        Box::new(EdgeStatusGuard),
        Box::new(SecureProfileHandler),
        Box::new(BundleNormalizer),
        Box::new(EdgeNegotiationHandler),
        Box::new(NetworkOutputFilter),
        Box::new(NodeContactHandler),
        Box::new(EdgeCascadeHandler),
    ]
}

fn parse_contents<T: serde::de::DeserializeOwned>(
    contents: Option<&Value>,
) -> Result<Option<T>, NetError> {
    match contents {
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        None => Ok(None),
    }
}

/// Drops external events whose RID type this node neither handles as
/// topology nor declares in its provides set.
pub struct BasicRidFilter;

#[async_trait]
impl KnowledgeHandler for BasicRidFilter {
    fn name(&self) -> &'static str {
        "basic_rid_filter"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Rid
    }

    fn filter(&self) -> HandlerFilter {
        HandlerFilter {
            external_only: true,
            ..HandlerFilter::default()
        }
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        let rid_type = kobj.rid.rid_type();
        if matches!(rid_type, RidType::Node | RidType::Edge) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let provides = &ctx.identity.profile().provides;
        if provides.event.contains(&rid_type) || provides.state.contains(&rid_type) {
            return Ok(HandlerOutcome::Unchanged);
        }
        debug!(rid = %kobj.rid, "rid type not handled by this node, dropping");
        Ok(HandlerOutcome::StopChain)
    }
}

/// Drops revisions that are not strictly newer than the cached one. FORGET
/// is unconditional and never filtered here.
pub struct BasicManifestFilter;

#[async_trait]
impl KnowledgeHandler for BasicManifestFilter {
    fn name(&self) -> &'static str {
        "basic_manifest_filter"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Manifest
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        if kobj.event_type == Some(EventType::Forget) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let Some(manifest) = &kobj.manifest else {
            return Ok(HandlerOutcome::Unchanged);
        };
        if let Some(cached) = ctx.cache.read(&kobj.rid)? {
            if !manifest.supersedes(&cached.manifest) {
                debug!(rid = %kobj.rid, "manifest not newer than cached revision, dropping");
                return Ok(HandlerOutcome::StopChain);
            }
        }
        Ok(HandlerOutcome::Unchanged)
    }
}

/// Keeps edge approval monotonic: once an edge is APPROVED, a PROPOSED
/// revision can never roll it back.
pub struct EdgeStatusGuard;

#[async_trait]
impl KnowledgeHandler for EdgeStatusGuard {
    fn name(&self) -> &'static str {
        "edge_status_guard"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Bundle
    }

    fn filter(&self) -> HandlerFilter {
        HandlerFilter {
            rid_types: Some(vec![RidType::Edge]),
            ..HandlerFilter::default()
        }
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        if kobj.event_type == Some(EventType::Forget) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let Some(incoming) = parse_contents::<EdgeProfile>(kobj.contents.as_ref())? else {
            return Ok(HandlerOutcome::Unchanged);
        };
        if incoming.status != EdgeStatus::Proposed {
            return Ok(HandlerOutcome::Unchanged);
        }
        if let Some(cached) = ctx.cache.read(&kobj.rid)? {
            let cached: EdgeProfile = cached.validate_contents()?;
            if cached.status == EdgeStatus::Approved {
                warn!(rid = %kobj.rid, "rejecting approval rollback on edge");
                return Ok(HandlerOutcome::StopChain);
            }
        }
        Ok(HandlerOutcome::Unchanged)
    }
}

/// Rejects node bundles whose public key does not hash to the node's RID
/// uuid.
pub struct SecureProfileHandler;

#[async_trait]
impl KnowledgeHandler for SecureProfileHandler {
    fn name(&self) -> &'static str {
        "secure_profile_handler"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Bundle
    }

    fn filter(&self) -> HandlerFilter {
        HandlerFilter {
            rid_types: Some(vec![RidType::Node]),
            ..HandlerFilter::default()
        }
    }

    async fn call(
        &self,
        _ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        if kobj.event_type == Some(EventType::Forget) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let Some(profile) = parse_contents::<NodeProfile>(kobj.contents.as_ref())? else {
            return Ok(HandlerOutcome::Unchanged);
        };
        let Rid::Node(node_rid) = &kobj.rid else {
            return Ok(HandlerOutcome::Unchanged);
        };

        let fingerprint = match fingerprint_der_b64(&profile.public_key) {
            Ok(fingerprint) => fingerprint,
            Err(_) => {
                warn!(rid = %kobj.rid, "node profile carries undecodable public key, dropping");
                return Ok(HandlerOutcome::StopChain);
            }
        };
        if fingerprint != node_rid.uuid {
            warn!(rid = %kobj.rid, "node profile public key does not match rid uuid, dropping");
            return Ok(HandlerOutcome::StopChain);
        }
        Ok(HandlerOutcome::Unchanged)
    }
}

/// Decides what actually happened: FORGET stays FORGET, otherwise the
/// cache decides between NEW and UPDATE.
pub struct BundleNormalizer;

#[async_trait]
impl KnowledgeHandler for BundleNormalizer {
    fn name(&self) -> &'static str {
        "bundle_normalizer"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Bundle
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        mut kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        kobj.normalized_event_type = if kobj.event_type == Some(EventType::Forget) {
            Some(EventType::Forget)
        } else if ctx.cache.exists(&kobj.rid)? {
            Some(EventType::Update)
        } else {
            Some(EventType::New)
        };
        Ok(HandlerOutcome::Updated(kobj))
    }
}

/// Evaluates PROPOSED edges naming this node as the provider, emitting an
/// APPROVED update (which re-enters the pipeline) when the proposal is
/// acceptable.
pub struct EdgeNegotiationHandler;

#[async_trait]
impl KnowledgeHandler for EdgeNegotiationHandler {
    fn name(&self) -> &'static str {
        "edge_negotiation_handler"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Network
    }

    fn filter(&self) -> HandlerFilter {
        HandlerFilter {
            rid_types: Some(vec![RidType::Edge]),
            ..HandlerFilter::default()
        }
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        if kobj.normalized_event_type == Some(EventType::Forget) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let Some(mut edge) = parse_contents::<EdgeProfile>(kobj.contents.as_ref())? else {
            return Ok(HandlerOutcome::Unchanged);
        };

        if &edge.target == ctx.identity.rid() && edge.status == EdgeStatus::Approved {
            info!(rid = %kobj.rid, source = %edge.source, "edge approved by provider");
            return Ok(HandlerOutcome::Unchanged);
        }

        if &edge.source != ctx.identity.rid() || edge.status != EdgeStatus::Proposed {
            return Ok(HandlerOutcome::Unchanged);
        }

        // We are the proposed provider: vet the subscriber and its types.
        if !ctx.cache.exists(&Rid::Node(edge.target.clone()))? {
            warn!(rid = %kobj.rid, subscriber = %edge.target, "edge proposed by unknown subscriber, ignoring");
            return Ok(HandlerOutcome::Unchanged);
        }
        let provides = &ctx.identity.profile().provides.event;
        if !edge.rid_types.iter().all(|t| provides.contains(t)) {
            warn!(rid = %kobj.rid, "edge proposal requests types this node does not provide, ignoring");
            return Ok(HandlerOutcome::Unchanged);
        }

        info!(rid = %kobj.rid, subscriber = %edge.target, "approving proposed edge");
        edge.status = EdgeStatus::Approved;
        let approved = Bundle::generate(kobj.rid.clone(), serde_json::to_value(&edge)?);
        ctx.kobj_queue.push_bundle(
            approved,
            Some(EventType::Update),
            KnowledgeSource::Internal,
        );
        Ok(HandlerOutcome::Unchanged)
    }
}

/// Selects broadcast targets: out-neighbors whose approved edge carries the
/// knowledge object's RID type, minus the peer that sent it to us.
pub struct NetworkOutputFilter;

#[async_trait]
impl KnowledgeHandler for NetworkOutputFilter {
    fn name(&self) -> &'static str {
        "network_output_filter"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Network
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        mut kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        let rid_type = kobj.rid.rid_type();
        let mut targets = HashSet::new();

        for neighbor in ctx.graph.get_neighbors(Direction::Out, None) {
            if kobj.source_peer() == Some(&neighbor) {
                continue;
            }
            let Some(edge) = ctx.graph.get_edge_profile(ctx.identity.rid(), &neighbor) else {
                continue;
            };
            if edge.status == EdgeStatus::Approved && edge.carries(&rid_type) {
                targets.insert(neighbor);
            }
        }

        kobj.network_targets = targets;
        Ok(HandlerOutcome::Updated(kobj))
    }
}

/// Reaches back to newly admitted nodes: introduce ourselves, then catch up
/// with them if they provide node state.
pub struct NodeContactHandler;

#[async_trait]
impl KnowledgeHandler for NodeContactHandler {
    fn name(&self) -> &'static str {
        "node_contact_handler"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Final
    }

    fn filter(&self) -> HandlerFilter {
        HandlerFilter {
            rid_types: Some(vec![RidType::Node]),
            external_only: true,
            ..HandlerFilter::default()
        }
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        if kobj.normalized_event_type != Some(EventType::New) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let Rid::Node(node) = &kobj.rid else {
            return Ok(HandlerOutcome::Unchanged);
        };
        if node == ctx.identity.rid() {
            return Ok(HandlerOutcome::Unchanged);
        }

        // Introduce ourselves to the newcomer. A NEW of our profile is
        // enough: a full FORGET+NEW reset here would re-admit the peer as
        // NEW on its side and ping-pong the contact forever.
        info!(%node, "new node admitted, reaching back");
        let introduction = Event::from_bundle(EventType::New, ctx.self_bundle()?);
        if let Err(err) = ctx.outbox.push_event_to(introduction, node) {
            warn!(%node, %err, "failed to queue introduction");
        }

        // Catch up with the newcomer if it can serve node state.
        if let Some(profile) = parse_contents::<NodeProfile>(kobj.contents.as_ref())? {
            if profile.provides_state(&RidType::Node) {
                ctx.sync
                    .catch_up_with(std::slice::from_ref(node), &[RidType::Node])
                    .await;
            }
        }
        Ok(HandlerOutcome::Unchanged)
    }
}

/// On FORGET of a node, forgets every edge incident to it.
pub struct EdgeCascadeHandler;

#[async_trait]
impl KnowledgeHandler for EdgeCascadeHandler {
    fn name(&self) -> &'static str {
        "edge_cascade_handler"
    }

    fn stage(&self) -> HandlerStage {
        HandlerStage::Final
    }

    fn filter(&self) -> HandlerFilter {
        HandlerFilter {
            rid_types: Some(vec![RidType::Node]),
            ..HandlerFilter::default()
        }
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        if kobj.normalized_event_type != Some(EventType::Forget) {
            return Ok(HandlerOutcome::Unchanged);
        }
        let Rid::Node(forgotten) = &kobj.rid else {
            return Ok(HandlerOutcome::Unchanged);
        };

        for edge_rid in ctx.cache.list_rids(&[RidType::Edge])? {
            let Some(bundle) = ctx.cache.read(&edge_rid)? else {
                continue;
            };
            let Ok(edge) = bundle.validate_contents::<EdgeProfile>() else {
                continue;
            };
            if edge.touches(forgotten) {
                info!(edge = %edge_rid, node = %forgotten, "cascading forget to incident edge");
                ctx.kobj_queue.push_rid(
                    edge_rid,
                    Some(EventType::Forget),
                    KnowledgeSource::Internal,
                );
            }
        }
        Ok(HandlerOutcome::Unchanged)
    }
}
