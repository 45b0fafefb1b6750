use serde::{Deserialize, Serialize};

use crate::error::KoiError;
use crate::manifest::{ContentHash, Manifest};
use crate::rid::Rid;

/// A full revision of a RID: its manifest plus the revision contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub manifest: Manifest,
    pub contents: serde_json::Value,
}

impl Bundle {
    /// Generate a bundle for `contents`, stamping a fresh manifest.
    pub fn generate(rid: Rid, contents: serde_json::Value) -> Self {
        let manifest = Manifest::generate(rid, &contents);
        Self { manifest, contents }
    }

    pub fn rid(&self) -> &Rid {
        &self.manifest.rid
    }

    /// Verify that the manifest hash matches the canonical hash of the
    /// contents.
    pub fn verify_integrity(&self) -> Result<(), KoiError> {
        let actual = ContentHash::of_contents(&self.contents);
        if actual != self.manifest.sha256_hash {
            return Err(KoiError::HashMismatch {
                rid: self.manifest.rid.to_string(),
            });
        }
        Ok(())
    }

    /// Deserialize the contents into a typed value.
    pub fn validate_contents<T: serde::de::DeserializeOwned>(&self) -> Result<T, KoiError> {
        serde_json::from_value(self.contents.clone()).map_err(|e| KoiError::InvalidContents {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_stamps_matching_hash() {
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let bundle = Bundle::generate(rid, json!({"title": "hello"}));
        bundle.verify_integrity().unwrap();
    }

    #[test]
    fn test_tampered_contents_fail_integrity() {
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let mut bundle = Bundle::generate(rid, json!({"title": "hello"}));
        bundle.contents = json!({"title": "tampered"});
        assert!(matches!(
            bundle.verify_integrity(),
            Err(KoiError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_serde_roundtrip_preserves_integrity() {
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let bundle = Bundle::generate(rid, json!({"n": 42, "tags": ["x", "y"]}));
        let encoded = serde_json::to_string(&bundle).unwrap();
        let decoded: Bundle = serde_json::from_str(&encoded).unwrap();
        assert_eq!(bundle, decoded);
        decoded.verify_integrity().unwrap();
    }

    #[test]
    fn test_validate_contents() {
        #[derive(Deserialize)]
        struct Doc {
            title: String,
        }
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let bundle = Bundle::generate(rid, json!({"title": "hello"}));
        let doc: Doc = bundle.validate_contents().unwrap();
        assert_eq!(doc.title, "hello");
        assert!(bundle.validate_contents::<Vec<u8>>().is_err());
    }
}
