use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use koi_cache::traits::Cache;
use koi_crypto::keys::{fingerprint_der_b64, PublicKey};
use koi_types::node::NodeProfile;
use koi_types::rid::{NodeRid, Rid};

use crate::error::{NetError, ProtocolErrorKind};
use crate::identity::NodeIdentity;
use crate::protocol::{ProtocolPayload, SignedEnvelope, UnsignedEnvelope};

/// Creates and verifies signed envelopes.
///
/// Verification resolves the sender's profile from the cache. An unknown
/// sender is admitted only through the handshake path: an events payload
/// introducing the sender's own profile, whose public key must hash to the
/// sender's RID uuid.
pub struct SecureLayer {
    identity: Arc<NodeIdentity>,
    cache: Arc<dyn Cache>,
    max_skew: Duration,
}

impl SecureLayer {
    pub fn new(identity: Arc<NodeIdentity>, cache: Arc<dyn Cache>, max_skew_secs: u64) -> Self {
        Self {
            identity,
            cache,
            max_skew: Duration::seconds(max_skew_secs as i64),
        }
    }

    /// Wrap a payload in a signed envelope addressed to `target`.
    pub fn create_envelope<P: ProtocolPayload>(
        &self,
        payload: P,
        target: &NodeRid,
    ) -> Result<SignedEnvelope<P>, NetError> {
        UnsignedEnvelope {
            payload,
            source_node: self.identity.rid().clone(),
            target_node: target.clone(),
        }
        .sign_with(self.identity.keypair())
    }

    /// Resolve the public key claimed by the envelope's source: from the
    /// cached profile, or from a handshake introduction in the payload.
    fn resolve_source_key<P: ProtocolPayload>(
        &self,
        envelope: &SignedEnvelope<P>,
    ) -> Result<String, NetError> {
        let source = Rid::Node(envelope.source_node.clone());
        if let Some(bundle) = self.cache.read(&source)? {
            let profile: NodeProfile = bundle
                .validate_contents()
                .map_err(|_| NetError::Protocol(ProtocolErrorKind::UnknownSourceNode))?;
            return Ok(profile.public_key);
        }

        // Handshake admission: the payload must introduce the sender.
        let bundle = envelope
            .payload
            .handshake_bundle(&envelope.source_node)
            .ok_or(NetError::Protocol(ProtocolErrorKind::UnknownSourceNode))?;
        debug!(source = %envelope.source_node, "admitting unknown sender via handshake");
        let profile: NodeProfile = bundle
            .validate_contents()
            .map_err(|_| NetError::Protocol(ProtocolErrorKind::UnknownSourceNode))?;
        Ok(profile.public_key)
    }

    /// Verify a received envelope: key identity, signature, and target.
    pub fn verify_envelope<P: ProtocolPayload>(
        &self,
        envelope: &SignedEnvelope<P>,
    ) -> Result<(), NetError> {
        let public_key_b64 = self.resolve_source_key(envelope)?;

        let fingerprint = fingerprint_der_b64(&public_key_b64)
            .map_err(|_| NetError::Protocol(ProtocolErrorKind::InvalidPublicKey))?;
        if fingerprint != envelope.source_node.uuid {
            return Err(NetError::Protocol(ProtocolErrorKind::InvalidPublicKey));
        }

        let public_key = PublicKey::from_der_b64(&public_key_b64)
            .map_err(|_| NetError::Protocol(ProtocolErrorKind::InvalidPublicKey))?;
        envelope.verify_with(&public_key)?;

        if &envelope.target_node != self.identity.rid() {
            return Err(NetError::Protocol(ProtocolErrorKind::InvalidTarget));
        }
        Ok(())
    }

    /// Reject request timestamps older than the skew window. Absent headers
    /// pass; the check only constrains peers that declare a timestamp.
    pub fn check_timestamp(&self, header: Option<&str>) -> Result<(), NetError> {
        let Some(raw) = header else { return Ok(()) };
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map_err(|_| NetError::Protocol(ProtocolErrorKind::StaleTimestamp))?
            .with_timezone(&Utc);
        if Utc::now() - timestamp > self.max_skew {
            return Err(NetError::Protocol(ProtocolErrorKind::StaleTimestamp));
        }
        Ok(())
    }
}
