use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use koi_types::event::EventType;
use koi_types::rid::RidType;

use crate::error::NetError;
use crate::processor::context::HandlerContext;
use crate::processor::kobj::{KnowledgeObject, KnowledgeSource};

/// The five points in the pipeline at which handler chains run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStage {
    Rid,
    Manifest,
    Bundle,
    Network,
    Final,
}

/// What a handler did with the knowledge object.
pub enum HandlerOutcome {
    /// Replace the knowledge object for the rest of the pipeline.
    Updated(KnowledgeObject),
    /// Keep the current knowledge object.
    Unchanged,
    /// Abort the entire pipeline for this knowledge object.
    StopChain,
}

/// Which knowledge objects a handler wants to see. Empty/None fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct HandlerFilter {
    pub rid_types: Option<Vec<RidType>>,
    pub external_only: bool,
    pub event_types: Option<Vec<EventType>>,
}

impl HandlerFilter {
    fn matches(&self, kobj: &KnowledgeObject) -> bool {
        if let Some(rid_types) = &self.rid_types {
            if !rid_types.contains(&kobj.rid.rid_type()) {
                return false;
            }
        }
        if self.external_only && !kobj.source.is_external() {
            return false;
        }
        if let Some(event_types) = &self.event_types {
            match kobj.event_type {
                Some(event_type) if event_types.contains(&event_type) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A handler registered at one pipeline stage.
#[async_trait]
pub trait KnowledgeHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn stage(&self) -> HandlerStage;
    fn filter(&self) -> HandlerFilter {
        HandlerFilter::default()
    }
    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError>;
}

/// Adapter turning a plain function into a handler, for node authors who
/// want to register custom admission logic without a struct.
pub struct FnHandler {
    name: &'static str,
    stage: HandlerStage,
    filter: HandlerFilter,
    #[allow(clippy::type_complexity)]
    func: Box<
        dyn Fn(&HandlerContext, KnowledgeObject) -> Result<HandlerOutcome, NetError> + Send + Sync,
    >,
}

impl FnHandler {
    pub fn new<F>(name: &'static str, stage: HandlerStage, filter: HandlerFilter, func: F) -> Self
    where
        F: Fn(&HandlerContext, KnowledgeObject) -> Result<HandlerOutcome, NetError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            stage,
            filter,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl KnowledgeHandler for FnHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn stage(&self) -> HandlerStage {
        self.stage
    }

    fn filter(&self) -> HandlerFilter {
        self.filter.clone()
    }

    async fn call(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome, NetError> {
        (self.func)(ctx, kobj)
    }
}

/// The five-stage knowledge processing pipeline.
///
/// Every queued knowledge object runs through the stage chains in order,
/// with the engine performing the implicit actions between stages: fetching
/// missing manifests and bundles, applying the normalized event to the
/// cache, regenerating the graph on topology changes, and fanning the
/// normalized event out to the selected targets.
pub struct KnowledgePipeline {
    ctx: Arc<HandlerContext>,
    handlers: Vec<Box<dyn KnowledgeHandler>>,
}

impl KnowledgePipeline {
    pub fn new(ctx: Arc<HandlerContext>, handlers: Vec<Box<dyn KnowledgeHandler>>) -> Self {
        Self { ctx, handlers }
    }

    pub fn add_handler(&mut self, handler: Box<dyn KnowledgeHandler>) {
        self.handlers.push(handler);
    }

    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.ctx
    }

    /// Run every matching handler of one stage. Returns `None` when a
    /// handler stopped the chain (or failed), which aborts the pipeline.
    async fn call_chain(
        &self,
        stage: HandlerStage,
        mut kobj: KnowledgeObject,
    ) -> Option<KnowledgeObject> {
        for handler in &self.handlers {
            if handler.stage() != stage || !handler.filter().matches(&kobj) {
                continue;
            }
            debug!(handler = handler.name(), ?stage, rid = %kobj.rid, "calling handler");
            match handler.call(&self.ctx, kobj.clone()).await {
                Ok(HandlerOutcome::Updated(updated)) => kobj = updated,
                Ok(HandlerOutcome::Unchanged) => {}
                Ok(HandlerOutcome::StopChain) => {
                    debug!(handler = handler.name(), rid = %kobj.rid, "handler stopped chain");
                    return None;
                }
                Err(err) => {
                    warn!(handler = handler.name(), rid = %kobj.rid, %err, "handler failed, dropping knowledge object");
                    return None;
                }
            }
        }
        Some(kobj)
    }

    /// Acquire a missing manifest: remotely for external knowledge, from
    /// the local cache for internal knowledge.
    async fn acquire_manifest(&self, kobj: &mut KnowledgeObject) -> Result<bool, NetError> {
        if kobj.manifest.is_some() {
            return Ok(true);
        }
        match &kobj.source {
            KnowledgeSource::External { .. } => {
                if let Some(manifest) = self.ctx.resolver.fetch_remote_manifest(&kobj.rid).await {
                    kobj.manifest = Some(manifest);
                }
            }
            KnowledgeSource::Internal => {
                if let Some(bundle) = self.ctx.cache.read(&kobj.rid)? {
                    kobj.manifest = Some(bundle.manifest);
                }
            }
        }
        Ok(kobj.manifest.is_some())
    }

    /// Acquire missing contents by the same rule as `acquire_manifest`.
    /// A retrieved bundle whose manifest disagrees wins, with a warning.
    async fn acquire_bundle(&self, kobj: &mut KnowledgeObject) -> Result<bool, NetError> {
        if kobj.contents.is_some() {
            return Ok(true);
        }
        let bundle = match &kobj.source {
            KnowledgeSource::External { .. } => self.ctx.resolver.fetch_remote_bundle(&kobj.rid).await,
            KnowledgeSource::Internal => self.ctx.cache.read(&kobj.rid)?,
        };
        let Some(bundle) = bundle else {
            return Ok(false);
        };
        if let Some(manifest) = &kobj.manifest {
            if manifest != &bundle.manifest {
                warn!(rid = %kobj.rid, "retrieved bundle carries a different manifest, adopting it");
            }
        }
        kobj.attach_bundle(bundle);
        Ok(true)
    }

    /// Drive one knowledge object through the full pipeline.
    pub async fn process(&self, kobj: KnowledgeObject) -> Result<(), NetError> {
        debug!(rid = %kobj.rid, event_type = ?kobj.event_type, "processing knowledge object");

        // Stage 1: RID.
        let Some(mut kobj) = self.call_chain(HandlerStage::Rid, kobj).await else {
            return Ok(());
        };

        if kobj.event_type == Some(EventType::Forget) {
            // Attach the doomed revision so downstream handlers observe the
            // pre-deletion state. Nothing cached means nothing to forget.
            let Some(bundle) = self.ctx.cache.read(&kobj.rid)? else {
                debug!(rid = %kobj.rid, "forget for unknown rid, nothing to do");
                return Ok(());
            };
            kobj.attach_bundle(bundle);
        } else if !self.acquire_manifest(&mut kobj).await? {
            debug!(rid = %kobj.rid, "manifest unavailable, dropping");
            return Ok(());
        }

        // Stage 2: Manifest.
        let Some(mut kobj) = self.call_chain(HandlerStage::Manifest, kobj).await else {
            return Ok(());
        };

        if !self.acquire_bundle(&mut kobj).await? {
            debug!(rid = %kobj.rid, "bundle unavailable, dropping");
            return Ok(());
        }

        // Stage 3: Bundle.
        let Some(kobj) = self.call_chain(HandlerStage::Bundle, kobj).await else {
            return Ok(());
        };

        // Apply the normalized event to the cache.
        match kobj.normalized_event_type {
            Some(EventType::New) | Some(EventType::Update) => {
                let Some(bundle) = kobj.bundle() else {
                    warn!(rid = %kobj.rid, "normalized write without a bundle, dropping");
                    return Ok(());
                };
                info!(rid = %kobj.rid, event_type = ?kobj.normalized_event_type, "writing to cache");
                self.ctx.cache.write(&bundle)?;
            }
            Some(EventType::Forget) => {
                info!(rid = %kobj.rid, "deleting from cache");
                self.ctx.cache.delete(&kobj.rid)?;
            }
            None => {
                debug!(rid = %kobj.rid, "normalized event type never set, pipeline ends");
                return Ok(());
            }
        }

        // Topology changed: rebuild the graph before targets are selected.
        if matches!(kobj.rid.rid_type(), RidType::Node | RidType::Edge) {
            debug!(rid = %kobj.rid, "node or edge changed, regenerating graph");
            self.ctx.graph.generate()?;
        }

        // Stage 4: Network.
        let Some(kobj) = self.call_chain(HandlerStage::Network, kobj).await else {
            return Ok(());
        };

        if let Some(event) = kobj.normalized_event() {
            debug!(
                rid = %kobj.rid,
                targets = kobj.network_targets.len(),
                "queueing event for network targets"
            );
            for target in &kobj.network_targets {
                if let Err(err) = self.ctx.outbox.push_event_to(event.clone(), target) {
                    warn!(%target, %err, "failed to queue outbound event");
                }
            }
        }

        // Stage 5: Final, observing the committed state.
        let _ = self.call_chain(HandlerStage::Final, kobj).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_kobj(event_type: Option<EventType>, source: KnowledgeSource) -> KnowledgeObject {
        KnowledgeObject::from_rid("orn:example.doc:a".parse().unwrap(), event_type, source)
    }

    fn peer() -> koi_types::rid::NodeRid {
        koi_types::rid::NodeRid {
            name: "peer".to_string(),
            uuid: "peer-uuid".to_string(),
        }
    }

    #[test]
    fn test_filter_rid_types() {
        let filter = HandlerFilter {
            rid_types: Some(vec![RidType::Node]),
            ..HandlerFilter::default()
        };
        let node_kobj = KnowledgeObject::from_rid(
            "orn:koi-net.node:a+1".parse().unwrap(),
            None,
            KnowledgeSource::Internal,
        );
        assert!(filter.matches(&node_kobj));
        assert!(!filter.matches(&doc_kobj(None, KnowledgeSource::Internal)));
    }

    #[test]
    fn test_filter_external_only() {
        let filter = HandlerFilter {
            external_only: true,
            ..HandlerFilter::default()
        };
        assert!(filter.matches(&doc_kobj(None, KnowledgeSource::External { peer: peer() })));
        assert!(!filter.matches(&doc_kobj(None, KnowledgeSource::Internal)));
    }

    #[test]
    fn test_filter_event_types() {
        let filter = HandlerFilter {
            event_types: Some(vec![EventType::Forget]),
            ..HandlerFilter::default()
        };
        assert!(filter.matches(&doc_kobj(Some(EventType::Forget), KnowledgeSource::Internal)));
        assert!(!filter.matches(&doc_kobj(Some(EventType::New), KnowledgeSource::Internal)));
        // No event type at all does not match a constrained filter.
        assert!(!filter.matches(&doc_kobj(None, KnowledgeSource::Internal)));
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let filter = HandlerFilter::default();
        assert!(filter.matches(&doc_kobj(None, KnowledgeSource::Internal)));
        assert!(filter.matches(&doc_kobj(
            Some(EventType::Update),
            KnowledgeSource::External { peer: peer() }
        )));
    }
}
