use thiserror::Error;

/// Errors shared across the KOI-net type layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KoiError {
    #[error("invalid rid '{input}': {reason}")]
    InvalidRid { input: String, reason: String },

    #[error("bundle hash mismatch for {rid}")]
    HashMismatch { rid: String },

    #[error("invalid bundle contents: {reason}")]
    InvalidContents { reason: String },

    #[error("invalid hash: {reason}")]
    InvalidHash { reason: String },

    #[error("invalid key material")]
    InvalidKeyMaterial,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("key file error: {reason}")]
    KeyFileError { reason: String },

    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_rid_display() {
        let err = KoiError::InvalidRid {
            input: "not-an-orn".to_string(),
            reason: "missing scheme".to_string(),
        };
        assert!(err.to_string().contains("not-an-orn"));
        assert!(err.to_string().contains("missing scheme"));
    }

    #[test]
    fn test_hash_mismatch_display() {
        let err = KoiError::HashMismatch {
            rid: "orn:example:a".to_string(),
        };
        assert!(err.to_string().contains("orn:example:a"));
    }
}
