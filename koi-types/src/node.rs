use serde::{Deserialize, Serialize};

use crate::rid::RidType;

/// Whether a node serves the full RPC surface or only polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    Full,
    Partial,
}

/// RID types a node offers to its peers, split by plane: `event` types are
/// broadcast over edges, `state` types can be fetched from its cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProvides {
    #[serde(default)]
    pub event: Vec<RidType>,
    #[serde(default)]
    pub state: Vec<RidType>,
}

/// A node's self-description, published as the contents of its node bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Reachable URL for full nodes; partial nodes have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub node_type: NodeType,
    #[serde(default)]
    pub provides: NodeProvides,
    /// base64url-encoded DER (SubjectPublicKeyInfo) public key.
    pub public_key: String,
}

impl NodeProfile {
    /// Whether this node can answer state fetches for the given RID type.
    pub fn provides_state(&self, rid_type: &RidType) -> bool {
        self.node_type == NodeType::Full && self.provides.state.contains(rid_type)
    }

    /// Whether this node publishes events for the given RID type.
    pub fn provides_event(&self, rid_type: &RidType) -> bool {
        self.provides.event.contains(rid_type)
    }
}
