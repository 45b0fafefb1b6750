use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use koi_types::bundle::Bundle;
use koi_types::event::{Event, EventType};
use koi_types::manifest::Manifest;
use koi_types::rid::Rid;

use crate::processor::kobj::{KnowledgeObject, KnowledgeSource};

/// Messages consumed by the knowledge worker.
pub enum KobjMsg {
    Kobj(Box<KnowledgeObject>),
    /// Acknowledged once every message queued before it has been processed.
    Flush(oneshot::Sender<()>),
    /// Stop the worker.
    Shutdown,
}

/// Sending half of the knowledge object queue. Cheap to clone; every
/// subsystem that produces knowledge holds one.
#[derive(Clone)]
pub struct KobjQueue {
    tx: mpsc::UnboundedSender<KobjMsg>,
}

impl KobjQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KobjMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, kobj: KnowledgeObject) {
        debug!(rid = %kobj.rid, "queued knowledge object");
        let _ = self.tx.send(KobjMsg::Kobj(Box::new(kobj)));
    }

    pub fn push_rid(&self, rid: Rid, event_type: Option<EventType>, source: KnowledgeSource) {
        self.push(KnowledgeObject::from_rid(rid, event_type, source));
    }

    pub fn push_manifest(
        &self,
        manifest: Manifest,
        event_type: Option<EventType>,
        source: KnowledgeSource,
    ) {
        self.push(KnowledgeObject::from_manifest(manifest, event_type, source));
    }

    pub fn push_bundle(
        &self,
        bundle: Bundle,
        event_type: Option<EventType>,
        source: KnowledgeSource,
    ) {
        self.push(KnowledgeObject::from_bundle(bundle, event_type, source));
    }

    pub fn push_event(&self, event: Event, source: KnowledgeSource) {
        self.push(KnowledgeObject::from_event(event, source));
    }

    /// Wait until everything queued before this call has been processed.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(KobjMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Push the shutdown sentinel to the worker.
    pub fn shutdown(&self) {
        let _ = self.tx.send(KobjMsg::Shutdown);
    }
}
