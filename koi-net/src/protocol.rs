use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use koi_crypto::keys::{Keypair, PublicKey};
use koi_types::bundle::Bundle;
use koi_types::event::{Event, EventType};
use koi_types::manifest::{canonical_json, Manifest};
use koi_types::rid::{NodeRid, Rid, RidType};

use crate::error::{NetError, ProtocolErrorKind};

// ─── API Paths ───────────────────────────────────────────────────────────────

pub const BROADCAST_EVENTS_PATH: &str = "/events/broadcast";
pub const POLL_EVENTS_PATH: &str = "/events/poll";
pub const FETCH_RIDS_PATH: &str = "/rids/fetch";
pub const FETCH_MANIFESTS_PATH: &str = "/manifests/fetch";
pub const FETCH_BUNDLES_PATH: &str = "/bundles/fetch";

// ─── Headers ─────────────────────────────────────────────────────────────────

/// Request timestamp header, RFC 3339. Receivers reject requests older than
/// their configured skew window.
pub const TIMESTAMP_HEADER: &str = "KOI-Net-Timestamp";

// ─── Request Payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsPayload {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEvents {
    /// The polling node, whose buffer is drained.
    pub rid: NodeRid,
    /// Maximum number of events to return; 0 means no limit.
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRids {
    #[serde(default)]
    pub rid_types: Vec<RidType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchManifests {
    #[serde(default)]
    pub rid_types: Vec<RidType>,
    #[serde(default)]
    pub rids: Vec<Rid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchBundles {
    pub rids: Vec<Rid>,
}

// ─── Response Payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RidsPayload {
    pub rids: Vec<Rid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestsPayload {
    pub manifests: Vec<Manifest>,
    #[serde(default)]
    pub not_found: Vec<Rid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlesPayload {
    pub bundles: Vec<Bundle>,
    #[serde(default)]
    pub not_found: Vec<Rid>,
}

/// Body of a 400 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ProtocolErrorKind,
}

// ─── Envelopes ───────────────────────────────────────────────────────────────

/// Every payload that travels in an envelope. `handshake_bundle` lets the
/// secure layer admit an unknown sender when the payload itself introduces
/// them: an `EventsPayload` carrying a `NEW` event for the sender's own
/// profile.
pub trait ProtocolPayload: Serialize {
    fn handshake_bundle(&self, _source: &NodeRid) -> Option<&Bundle> {
        None
    }
}

impl ProtocolPayload for EventsPayload {
    fn handshake_bundle(&self, source: &NodeRid) -> Option<&Bundle> {
        self.events
            .iter()
            .find(|event| {
                event.event_type == EventType::New
                    && event.rid.as_node() == Some(source)
                    && event.bundle.is_some()
            })
            .and_then(|event| event.bundle.as_ref())
    }
}

impl ProtocolPayload for PollEvents {}
impl ProtocolPayload for FetchRids {}
impl ProtocolPayload for FetchManifests {}
impl ProtocolPayload for FetchBundles {}
impl ProtocolPayload for RidsPayload {}
impl ProtocolPayload for ManifestsPayload {}
impl ProtocolPayload for BundlesPayload {}

/// Canonical byte form of an unsigned envelope: compact JSON with ordered
/// keys. This is the exact message signed and verified on both ends.
pub fn envelope_signing_bytes<P: Serialize>(
    payload: &P,
    source_node: &NodeRid,
    target_node: &NodeRid,
) -> Result<Vec<u8>, NetError> {
    let value = serde_json::json!({
        "payload": serde_json::to_value(payload)?,
        "source_node": source_node,
        "target_node": target_node,
    });
    Ok(canonical_json(&value))
}

/// An envelope before signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedEnvelope<P> {
    pub payload: P,
    pub source_node: NodeRid,
    pub target_node: NodeRid,
}

impl<P: Serialize> UnsignedEnvelope<P> {
    /// Sign the canonical form of this envelope.
    pub fn sign_with(self, keypair: &Keypair) -> Result<SignedEnvelope<P>, NetError> {
        let message = envelope_signing_bytes(&self.payload, &self.source_node, &self.target_node)?;
        let signature = keypair.sign(&message);
        Ok(SignedEnvelope {
            payload: self.payload,
            source_node: self.source_node,
            target_node: self.target_node,
            signature,
        })
    }
}

/// The wire form of every RPC body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope<P> {
    pub payload: P,
    pub source_node: NodeRid,
    pub target_node: NodeRid,
    /// base64url DER ECDSA signature over the canonical unsigned envelope.
    pub signature: String,
}

impl<P: Serialize> SignedEnvelope<P> {
    /// Verify the signature against a public key.
    pub fn verify_with(&self, public_key: &PublicKey) -> Result<(), NetError> {
        let message = envelope_signing_bytes(&self.payload, &self.source_node, &self.target_node)?;
        public_key
            .verify(&self.signature, &message)
            .map_err(|_| NetError::Protocol(ProtocolErrorKind::InvalidSignature))
    }
}

impl<P: DeserializeOwned> SignedEnvelope<P> {
    pub fn from_json(body: &str) -> Result<Self, NetError> {
        serde_json::from_str(body).map_err(NetError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_rid(name: &str) -> NodeRid {
        NodeRid {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
        }
    }

    fn sample_envelope(keypair: &Keypair) -> SignedEnvelope<EventsPayload> {
        let payload = EventsPayload {
            events: vec![Event::from_rid(
                EventType::Forget,
                "orn:example.doc:a".parse().unwrap(),
            )],
        };
        UnsignedEnvelope {
            payload,
            source_node: node_rid("a"),
            target_node: node_rid("b"),
        }
        .sign_with(keypair)
        .unwrap()
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = Keypair::generate();
        let envelope = sample_envelope(&keypair);
        envelope.verify_with(&keypair.public_key()).unwrap();
    }

    #[test]
    fn test_json_roundtrip_preserves_signature_validity() {
        let keypair = Keypair::generate();
        let envelope = sample_envelope(&keypair);
        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: SignedEnvelope<EventsPayload> = SignedEnvelope::from_json(&encoded).unwrap();
        decoded.verify_with(&keypair.public_key()).unwrap();
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let keypair = Keypair::generate();
        let mut envelope = sample_envelope(&keypair);
        envelope.payload.events.clear();
        assert!(matches!(
            envelope.verify_with(&keypair.public_key()),
            Err(NetError::Protocol(ProtocolErrorKind::InvalidSignature))
        ));
    }

    #[test]
    fn test_tampered_target_fails_verification() {
        let keypair = Keypair::generate();
        let mut envelope = sample_envelope(&keypair);
        envelope.target_node = node_rid("mallory");
        assert!(envelope.verify_with(&keypair.public_key()).is_err());
    }

    #[test]
    fn test_handshake_bundle_extraction() {
        let source = node_rid("newcomer");
        let bundle = Bundle::generate(Rid::Node(source.clone()), json!({"hello": true}));
        let payload = EventsPayload {
            events: vec![
                Event::from_rid(EventType::Forget, Rid::Node(source.clone())),
                Event::from_bundle(EventType::New, bundle.clone()),
            ],
        };
        assert_eq!(payload.handshake_bundle(&source), Some(&bundle));
        // A different source finds nothing.
        assert_eq!(payload.handshake_bundle(&node_rid("other")), None);
        // Fetch requests never admit unknown senders.
        assert!(FetchRids::default().handshake_bundle(&source).is_none());
    }

    #[test]
    fn test_poll_events_limit_defaults_to_zero() {
        let req: PollEvents =
            serde_json::from_str(r#"{"rid": "orn:koi-net.node:a+1"}"#).unwrap();
        assert_eq!(req.limit, 0);
    }
}
