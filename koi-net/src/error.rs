use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-level rejection kinds, carried in 400 responses as
/// `{"error": <kind>}` and raised locally when an inbound envelope fails
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    UnknownSourceNode,
    InvalidPublicKey,
    InvalidSignature,
    InvalidTarget,
    StaleTimestamp,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolErrorKind::UnknownSourceNode => "unknown_source_node",
            ProtocolErrorKind::InvalidPublicKey => "invalid_public_key",
            ProtocolErrorKind::InvalidSignature => "invalid_signature",
            ProtocolErrorKind::InvalidTarget => "invalid_target",
            ProtocolErrorKind::StaleTimestamp => "stale_timestamp",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the network core.
#[derive(Debug, Error)]
pub enum NetError {
    /// An envelope was rejected, locally or by a peer.
    #[error("protocol error: {0}")]
    Protocol(ProtocolErrorKind),

    /// Partial nodes serve no endpoints and cannot be queried.
    #[error("partial node cannot be queried: {node}")]
    PartialNodeQuery { node: String },

    /// No URL is known for the target node.
    #[error("node url not found: {node}")]
    NodeNotFound { node: String },

    /// A node tried to issue a request to itself.
    #[error("refusing to send a request to self")]
    SelfRequest,

    /// Connection or transfer failure talking to a peer.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("cache error: {0}")]
    Cache(#[from] koi_cache::error::CacheError),

    #[error(transparent)]
    Types(#[from] koi_types::error::KoiError),

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// A worker queue was closed while the node was still running.
    #[error("worker channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        NetError::Transport {
            reason: err.to_string(),
        }
    }
}
