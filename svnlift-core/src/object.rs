//! Content addressing for file payloads
//!
//! SVN dumps identify file text by SHA-1; the same digest keys the blob
//! index and is what tree nodes store as their content hash.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// SHA-1 digest of a file payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 20]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Compute ContentHash from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha1::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str.trim())?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentHash::from_hex(&value)
    }
}

/// Incremental SHA-1 for payloads read in chunks
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha1,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> ContentHash {
        ContentHash(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_hex_roundtrip() {
        let id = ContentHash::new([42u8; 20]);
        let id2 = ContentHash::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_known_sha1() {
        assert_eq!(
            ContentHash::from_data(b"hello").to_hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hel");
        hasher.update(b"lo");
        assert_eq!(hasher.finish(), ContentHash::from_data(b"hello"));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = ContentHash::from_data(b"hello");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d\"");
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
