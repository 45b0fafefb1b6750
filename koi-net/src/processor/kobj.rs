use std::collections::HashSet;

use serde_json::Value;

use koi_types::bundle::Bundle;
use koi_types::event::{Event, EventType};
use koi_types::manifest::Manifest;
use koi_types::rid::{NodeRid, Rid};

/// Where a knowledge object came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeSource {
    /// Produced by this node (startup re-ingest, handler emissions).
    Internal,
    /// Received from a peer.
    External { peer: NodeRid },
}

impl KnowledgeSource {
    pub fn peer(&self) -> Option<&NodeRid> {
        match self {
            KnowledgeSource::Internal => None,
            KnowledgeSource::External { peer } => Some(peer),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, KnowledgeSource::External { .. })
    }
}

/// A pending change to the cache, mutated as it moves through the pipeline.
///
/// `event_type` is what the producer claimed; `normalized_event_type` is
/// what this node decided actually happened, and drives the cache mutation
/// and re-broadcast.
#[derive(Debug, Clone)]
pub struct KnowledgeObject {
    pub rid: Rid,
    pub event_type: Option<EventType>,
    pub manifest: Option<Manifest>,
    pub contents: Option<Value>,
    pub source: KnowledgeSource,
    pub normalized_event_type: Option<EventType>,
    pub network_targets: HashSet<NodeRid>,
}

impl KnowledgeObject {
    pub fn from_rid(rid: Rid, event_type: Option<EventType>, source: KnowledgeSource) -> Self {
        Self {
            rid,
            event_type,
            manifest: None,
            contents: None,
            source,
            normalized_event_type: None,
            network_targets: HashSet::new(),
        }
    }

    pub fn from_manifest(
        manifest: Manifest,
        event_type: Option<EventType>,
        source: KnowledgeSource,
    ) -> Self {
        Self {
            rid: manifest.rid.clone(),
            event_type,
            manifest: Some(manifest),
            contents: None,
            source,
            normalized_event_type: None,
            network_targets: HashSet::new(),
        }
    }

    pub fn from_bundle(
        bundle: Bundle,
        event_type: Option<EventType>,
        source: KnowledgeSource,
    ) -> Self {
        Self {
            rid: bundle.manifest.rid.clone(),
            event_type,
            manifest: Some(bundle.manifest),
            contents: Some(bundle.contents),
            source,
            normalized_event_type: None,
            network_targets: HashSet::new(),
        }
    }

    pub fn from_event(event: Event, source: KnowledgeSource) -> Self {
        match event.bundle {
            Some(bundle) => Self::from_bundle(bundle, Some(event.event_type), source),
            None => Self::from_rid(event.rid, Some(event.event_type), source),
        }
    }

    /// The bundle carried by this knowledge object, once both parts exist.
    pub fn bundle(&self) -> Option<Bundle> {
        match (&self.manifest, &self.contents) {
            (Some(manifest), Some(contents)) => Some(Bundle {
                manifest: manifest.clone(),
                contents: contents.clone(),
            }),
            _ => None,
        }
    }

    /// Attach a bundle's manifest and contents.
    pub fn attach_bundle(&mut self, bundle: Bundle) {
        self.manifest = Some(bundle.manifest);
        self.contents = Some(bundle.contents);
    }

    /// The peer this knowledge arrived from, if external.
    pub fn source_peer(&self) -> Option<&NodeRid> {
        self.source.peer()
    }

    /// The event this node re-broadcasts after admission: the normalized
    /// type, with the bundle attached for NEW/UPDATE and omitted for FORGET.
    pub fn normalized_event(&self) -> Option<Event> {
        match self.normalized_event_type? {
            EventType::Forget => Some(Event::from_rid(EventType::Forget, self.rid.clone())),
            event_type => self
                .bundle()
                .map(|bundle| Event::from_bundle(event_type, bundle)),
        }
    }
}
