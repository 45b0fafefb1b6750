use serde_json::Value;

use koi_crypto::keys::Keypair;
use koi_types::bundle::Bundle;
use koi_types::node::NodeProfile;
use koi_types::rid::{NodeRid, Rid};

use crate::error::NetError;

/// A node's own identity: its RID, profile, and signing key.
///
/// The RID is derived from the public key, so identity and key material can
/// never drift apart. The profile's `public_key` field is overwritten with
/// the keypair's DER form at construction.
pub struct NodeIdentity {
    rid: NodeRid,
    profile: NodeProfile,
    keypair: Keypair,
}

impl NodeIdentity {
    /// Build an identity from a node name, its keypair, and the rest of its
    /// profile.
    pub fn new(name: &str, keypair: Keypair, mut profile: NodeProfile) -> Result<Self, NetError> {
        let public_key = keypair.public_key();
        profile.public_key = public_key.to_der_b64()?;
        let rid = NodeRid::from_public_key(name, &public_key.to_der()?);
        Ok(Self {
            rid,
            profile,
            keypair,
        })
    }

    pub fn rid(&self) -> &NodeRid {
        &self.rid
    }

    pub fn profile(&self) -> &NodeProfile {
        &self.profile
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// A fresh bundle of this node's profile, ready for (re-)publication.
    pub fn bundle(&self) -> Result<Bundle, NetError> {
        let contents: Value = serde_json::to_value(&self.profile)?;
        Ok(Bundle::generate(Rid::Node(self.rid.clone()), contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koi_crypto::keys::fingerprint_der_b64;
    use koi_types::node::{NodeProvides, NodeType};

    fn sample_profile() -> NodeProfile {
        NodeProfile {
            base_url: Some("http://127.0.0.1:8000".to_string()),
            node_type: NodeType::Full,
            provides: NodeProvides::default(),
            public_key: String::new(),
        }
    }

    #[test]
    fn test_rid_uuid_is_key_fingerprint() {
        let identity = NodeIdentity::new("alpha", Keypair::generate(), sample_profile()).unwrap();
        let fingerprint = fingerprint_der_b64(&identity.profile().public_key).unwrap();
        assert_eq!(identity.rid().uuid, fingerprint);
        assert_eq!(identity.rid().name, "alpha");
    }

    #[test]
    fn test_profile_public_key_is_overwritten() {
        let mut profile = sample_profile();
        profile.public_key = "stale".to_string();
        let identity = NodeIdentity::new("alpha", Keypair::generate(), profile).unwrap();
        assert_ne!(identity.profile().public_key, "stale");
    }

    #[test]
    fn test_bundle_contains_profile() {
        let identity = NodeIdentity::new("alpha", Keypair::generate(), sample_profile()).unwrap();
        let bundle = identity.bundle().unwrap();
        assert_eq!(bundle.rid(), &Rid::Node(identity.rid().clone()));
        let profile: NodeProfile = bundle.validate_contents().unwrap();
        assert_eq!(&profile, identity.profile());
        bundle.verify_integrity().unwrap();
    }
}
