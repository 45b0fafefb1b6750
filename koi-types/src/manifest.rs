use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::KoiError;
use crate::rid::Rid;

/// SHA-256 digest of a bundle's canonical contents, hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash the canonical JSON form of the given contents.
    pub fn of_contents(contents: &serde_json::Value) -> Self {
        let bytes = canonical_json(contents);
        Self(Sha256::digest(&bytes).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, KoiError> {
        let bytes = hex::decode(s).map_err(|e| KoiError::InvalidHash {
            reason: e.to_string(),
        })?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KoiError::InvalidHash {
            reason: "expected 32 bytes".to_string(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Serialize a JSON value into its canonical byte form: compact separators
/// and lexicographically ordered object keys. Both signing and content
/// hashing run over this form so that independently produced encodings of
/// the same value agree.
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    // serde_json's Map is BTreeMap-backed, so object keys are already
    // ordered; compact output is the default.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Identifies a specific revision of a RID: its timestamp and the hash of
/// the revision's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub rid: Rid,
    pub timestamp: DateTime<Utc>,
    pub sha256_hash: ContentHash,
}

impl Manifest {
    /// Stamp a new manifest for the given contents at the current time.
    pub fn generate(rid: Rid, contents: &serde_json::Value) -> Self {
        Self {
            rid,
            timestamp: Utc::now(),
            sha256_hash: ContentHash::of_contents(contents),
        }
    }

    /// Whether this manifest is a strictly newer revision than `other`.
    pub fn supersedes(&self, other: &Manifest) -> bool {
        self.timestamp > other.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_orders_keys() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), br#"{"a":2,"b":1}"#.to_vec());
    }

    #[test]
    fn test_content_hash_deterministic() {
        let contents = json!({"x": 1, "nested": {"z": true, "y": [1, 2]}});
        let h1 = ContentHash::of_contents(&contents);
        let h2 = ContentHash::of_contents(&contents);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_content_hash_differs_on_change() {
        let h1 = ContentHash::of_contents(&json!({"v": 1}));
        let h2 = ContentHash::of_contents(&json!({"v": 2}));
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_content_hash_hex_roundtrip() {
        let h = ContentHash::of_contents(&json!({"v": 1}));
        let hex = h.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex).unwrap(), h);
    }

    #[test]
    fn test_content_hash_rejects_bad_hex() {
        assert!(ContentHash::from_hex("xyz").is_err());
        assert!(ContentHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_manifest_serde_roundtrip() {
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let manifest = Manifest::generate(rid, &json!({"v": 1}));
        let encoded = serde_json::to_string(&manifest).unwrap();
        let decoded: Manifest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(manifest, decoded);
    }

    #[test]
    fn test_supersedes_is_strict() {
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let older = Manifest {
            rid: rid.clone(),
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            sha256_hash: ContentHash::of_contents(&json!(1)),
        };
        let newer = Manifest {
            rid,
            timestamp: "2024-01-02T00:00:00Z".parse().unwrap(),
            sha256_hash: ContentHash::of_contents(&json!(2)),
        };
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
        assert!(!older.supersedes(&older));
    }
}
