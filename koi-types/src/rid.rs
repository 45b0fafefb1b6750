use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::KoiError;

/// URI scheme shared by all reference identifiers.
pub const ORN_SCHEME: &str = "orn";

/// RID context for KOI-net nodes.
pub const NODE_CONTEXT: &str = "koi-net.node";

/// RID context for KOI-net edges.
pub const EDGE_CONTEXT: &str = "koi-net.edge";

/// A typed reference identifier of the form `orn:<context>:<reference>`.
///
/// The node and edge contexts are known to the protocol core and carry a
/// `<name>+<uuid>` reference; every other context is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rid {
    Node(NodeRid),
    Edge(EdgeRid),
    Other { context: String, reference: String },
}

/// RID naming a KOI-net node. The uuid of a valid node RID is the lowercase
/// hex SHA-256 of the node's DER-encoded public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRid {
    pub name: String,
    pub uuid: String,
}

/// RID naming a subscription edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeRid {
    pub name: String,
    pub uuid: String,
}

/// The type of a RID, i.e. its context component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RidType {
    Node,
    Edge,
    Other(String),
}

impl NodeRid {
    /// Derive a node RID from a name and the node's DER-encoded public key.
    pub fn from_public_key(name: impl Into<String>, public_key_der: &[u8]) -> Self {
        let uuid = hex::encode(Sha256::digest(public_key_der));
        Self {
            name: name.into(),
            uuid,
        }
    }
}

impl EdgeRid {
    /// Create a fresh edge RID with a random uuid.
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Rid {
    /// The RID's type (context).
    pub fn rid_type(&self) -> RidType {
        match self {
            Rid::Node(_) => RidType::Node,
            Rid::Edge(_) => RidType::Edge,
            Rid::Other { context, .. } => RidType::Other(context.clone()),
        }
    }

    /// The context component of this RID.
    pub fn context(&self) -> &str {
        match self {
            Rid::Node(_) => NODE_CONTEXT,
            Rid::Edge(_) => EDGE_CONTEXT,
            Rid::Other { context, .. } => context,
        }
    }

    /// Returns the node RID if this is a node.
    pub fn as_node(&self) -> Option<&NodeRid> {
        match self {
            Rid::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the edge RID if this is an edge.
    pub fn as_edge(&self) -> Option<&EdgeRid> {
        match self {
            Rid::Edge(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NodeRid> for Rid {
    fn from(rid: NodeRid) -> Self {
        Rid::Node(rid)
    }
}

impl From<EdgeRid> for Rid {
    fn from(rid: EdgeRid) -> Self {
        Rid::Edge(rid)
    }
}

impl fmt::Display for NodeRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}+{}",
            ORN_SCHEME, NODE_CONTEXT, self.name, self.uuid
        )
    }
}

impl fmt::Display for EdgeRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}+{}",
            ORN_SCHEME, EDGE_CONTEXT, self.name, self.uuid
        )
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rid::Node(n) => n.fmt(f),
            Rid::Edge(e) => e.fmt(f),
            Rid::Other { context, reference } => {
                write!(f, "{}:{}:{}", ORN_SCHEME, context, reference)
            }
        }
    }
}

impl fmt::Display for RidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RidType::Node => f.write_str(NODE_CONTEXT),
            RidType::Edge => f.write_str(EDGE_CONTEXT),
            RidType::Other(context) => f.write_str(context),
        }
    }
}

/// Split a `<name>+<uuid>` reference. The uuid is everything after the last
/// `+` so that names containing `+` still parse.
fn split_reference(input: &str, reference: &str) -> Result<(String, String), KoiError> {
    let (name, uuid) = reference
        .rsplit_once('+')
        .ok_or_else(|| KoiError::InvalidRid {
            input: input.to_string(),
            reason: "expected '<name>+<uuid>' reference".to_string(),
        })?;
    if name.is_empty() || uuid.is_empty() {
        return Err(KoiError::InvalidRid {
            input: input.to_string(),
            reason: "empty name or uuid".to_string(),
        });
    }
    Ok((name.to_string(), uuid.to_string()))
}

impl FromStr for Rid {
    type Err = KoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("orn:")
            .ok_or_else(|| KoiError::InvalidRid {
                input: s.to_string(),
                reason: "missing 'orn:' scheme".to_string(),
            })?;
        let (context, reference) = rest.split_once(':').ok_or_else(|| KoiError::InvalidRid {
            input: s.to_string(),
            reason: "missing context separator".to_string(),
        })?;
        if context.is_empty() || reference.is_empty() {
            return Err(KoiError::InvalidRid {
                input: s.to_string(),
                reason: "empty context or reference".to_string(),
            });
        }

        match context {
            NODE_CONTEXT => {
                let (name, uuid) = split_reference(s, reference)?;
                Ok(Rid::Node(NodeRid { name, uuid }))
            }
            EDGE_CONTEXT => {
                let (name, uuid) = split_reference(s, reference)?;
                Ok(Rid::Edge(EdgeRid { name, uuid }))
            }
            _ => Ok(Rid::Other {
                context: context.to_string(),
                reference: reference.to_string(),
            }),
        }
    }
}

impl FromStr for NodeRid {
    type Err = KoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Rid::from_str(s)? {
            Rid::Node(n) => Ok(n),
            other => Err(KoiError::InvalidRid {
                input: s.to_string(),
                reason: format!("expected a node rid, got context '{}'", other.context()),
            }),
        }
    }
}

impl FromStr for EdgeRid {
    type Err = KoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Rid::from_str(s)? {
            Rid::Edge(e) => Ok(e),
            other => Err(KoiError::InvalidRid {
                input: s.to_string(),
                reason: format!("expected an edge rid, got context '{}'", other.context()),
            }),
        }
    }
}

impl FromStr for RidType {
    type Err = KoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(KoiError::InvalidRid {
                input: s.to_string(),
                reason: "empty rid type".to_string(),
            });
        }
        Ok(match s {
            NODE_CONTEXT => RidType::Node,
            EDGE_CONTEXT => RidType::Edge,
            other => RidType::Other(other.to_string()),
        })
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

string_serde!(Rid);
string_serde!(NodeRid);
string_serde!(EdgeRid);
string_serde!(RidType);
