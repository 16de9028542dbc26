use sha3::{Digest, Sha3_256};
use strata_types::canonical::to_canonical_bytes;
use strata_types::{HashValue, TypeError};

/// SHA3-256 hasher producing ledger [`HashValue`]s.
///
/// Every ledger hash (block hashes, balance locks, genesis linkage) is the
/// digest of an entity's canonical bytes, so there is no domain tag.
pub struct Sha3Hasher;

impl Sha3Hasher {
    /// Hash raw bytes.
    pub fn hash(data: &[u8]) -> HashValue {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        HashValue::from_bytes(hasher.finalize().into())
    }

    /// Hash a serializable value through its canonical encoding.
    pub fn hash_canonical<T: serde::Serialize + ?Sized>(
        value: &T,
    ) -> Result<HashValue, HasherError> {
        let data = to_canonical_bytes(value)?;
        Ok(Self::hash(&data))
    }

    /// Whether `data` hashes to `expected`.
    pub fn verify(data: &[u8], expected: &HashValue) -> bool {
        Self::hash(data) == *expected
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<TypeError> for HasherError {
    fn from(err: TypeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA3-256("abc")
        assert_eq!(
            Sha3Hasher::hash(b"abc").to_hex(),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(Sha3Hasher::hash(b"ledger"), Sha3Hasher::hash(b"ledger"));
        assert_ne!(Sha3Hasher::hash(b"ledger"), Sha3Hasher::hash(b"ledgers"));
    }

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            Sha3Hasher::hash_canonical(&a).unwrap(),
            Sha3Hasher::hash_canonical(&b).unwrap()
        );
        assert_eq!(
            Sha3Hasher::hash_canonical(&a).unwrap(),
            Sha3Hasher::hash(br#"{"a":2,"b":1}"#)
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let expected = Sha3Hasher::hash(b"payload");
        assert!(Sha3Hasher::verify(b"payload", &expected));
        assert!(!Sha3Hasher::verify(b"pay1oad", &expected));
    }
}
