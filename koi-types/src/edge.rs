use serde::{Deserialize, Serialize};

use crate::rid::{NodeRid, RidType};

/// How events travel along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeType {
    Webhook,
    Poll,
}

/// Edge lifecycle. Approval is strictly monotonic: an edge moves from
/// `PROPOSED` to `APPROVED` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeStatus {
    Proposed,
    Approved,
}

/// A directed subscription: `target` subscribes to events about `rid_types`
/// published by `source`. Proposed by the subscriber, approved by the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeProfile {
    pub source: NodeRid,
    pub target: NodeRid,
    pub edge_type: EdgeType,
    pub rid_types: Vec<RidType>,
    pub status: EdgeStatus,
}

impl EdgeProfile {
    /// Whether this edge carries events of the given RID type.
    pub fn carries(&self, rid_type: &RidType) -> bool {
        self.rid_types.contains(rid_type)
    }

    /// Whether the given node is one of the edge's endpoints.
    pub fn touches(&self, node: &NodeRid) -> bool {
        &self.source == node || &self.target == node
    }
}
