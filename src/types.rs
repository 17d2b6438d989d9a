//! Core value types shared across the crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Content hash for payloads (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the first two characters of the hex (for sharding).
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[0..1])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An opaque binary payload (image or audio bytes).
///
/// Cloning is cheap: the bytes are shared. Two payloads compare equal when
/// their content hashes match, regardless of which allocation backs them.
#[derive(Clone)]
pub struct Payload {
    hash: Hash,
    bytes: Arc<[u8]>,
}

impl Payload {
    /// Wrap bytes as a payload, hashing the content.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            hash: Hash::from_bytes(&bytes),
            bytes,
        }
    }

    /// Build a payload from bytes whose hash is already known.
    pub(crate) fn from_parts(hash: Hash, bytes: Arc<[u8]>) -> Self {
        Self { hash, bytes }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether both payloads share the same allocation.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({:?}, {} bytes)", self.hash, self.bytes.len())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::new(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = Hash::from_bytes(b"hello world");
        assert_eq!(hash, Hash::from_bytes(b"hello world"));
        assert_eq!(
            hash.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(hash.to_hex().starts_with(&hash.shard_prefix()));
    }

    #[test]
    fn test_hash_shard_prefix() {
        let hash = Hash::from_bytes(b"test");
        assert_eq!(hash.shard_prefix().len(), 2);
    }

    #[test]
    fn test_payload_equality_is_by_content() {
        let a = Payload::new(b"jpeg bytes".to_vec());
        let b = Payload::new(b"jpeg bytes".to_vec());
        let c = a.clone();

        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&c));
        assert_ne!(a, Payload::new(b"other".to_vec()));
    }
}
