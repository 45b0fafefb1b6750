use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::manifest::Manifest;
use crate::rid::Rid;

/// The kind of change an event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    New,
    Update,
    Forget,
}

/// A change notification about a single RID. `FORGET` carries no bundle;
/// `NEW`/`UPDATE` should carry one but may omit it, prompting receivers to
/// fetch the revision themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub rid: Rid,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
}

impl Event {
    pub fn from_rid(event_type: EventType, rid: Rid) -> Self {
        Self {
            rid,
            event_type,
            bundle: None,
        }
    }

    pub fn from_bundle(event_type: EventType, bundle: Bundle) -> Self {
        Self {
            rid: bundle.rid().clone(),
            event_type,
            bundle: Some(bundle),
        }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.bundle.as_ref().map(|b| &b.manifest)
    }
}
