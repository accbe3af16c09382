//! The cipher seam.
//!
//! Relay and clients are generic over [`Cipher`], chosen at construction
//! time. [`RsaCipher`](crate::RsaCipher) is the real one;
//! [`PassthroughCipher`] keeps the same shape without any cryptography and
//! exists for smoke tests.

use std::fmt::Debug;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, KeyFormatError};

/// Encrypts for remote parties and decrypts with the local private key.
pub trait Cipher: Send + Sync + 'static {
    /// Parsed form of a remote party's public key.
    type PublicKey: Clone + Debug + Send + Sync + 'static;

    /// Our own public key, serialized for the handshake line.
    fn local_public_key(&self) -> &str;

    /// Parse a handshake line into a remote public key.
    fn parse_public_key(&self, blob: &str) -> Result<Self::PublicKey, KeyFormatError>;

    /// Encrypt `plaintext` for `recipient`, returning one wire line.
    fn encrypt(&self, plaintext: &str, recipient: &Self::PublicKey) -> Result<String, CryptoError>;

    /// Decrypt a wire line addressed to us.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;

    /// Largest plaintext that can be encrypted for `recipient` in one call.
    fn capacity(&self, recipient: &Self::PublicKey) -> usize;
}

/// Short human-comparable fingerprint of a public key blob.
///
/// First 8 bytes of SHA-256 over the decoded blob, hex encoded. Falls back to
/// hashing the raw text when the blob is not base64.
pub fn fingerprint(blob: &str) -> String {
    let blob = blob.trim();
    let bytes = STANDARD
        .decode(blob)
        .unwrap_or_else(|_| blob.as_bytes().to_vec());
    let digest = Sha256::digest(&bytes);
    hex::encode(&digest[..8])
}

/// Prefix the passthrough cipher puts in front of every message.
pub const PASSTHROUGH_PREFIX: &str = "ENCRYPTED: ";

/// Capacity of RSA-2048 with PKCS#1 v1.5 padding.
pub const PASSTHROUGH_DEFAULT_CAPACITY: usize = 245;

/// No-op cipher for smoke tests.
///
/// "Encrypting" prepends [`PASSTHROUGH_PREFIX`]; "decrypting" strips it.
/// Key blobs are base64 labels. Size limits and key parsing failures behave
/// like the real cipher so the relay's error paths can be exercised without
/// generating RSA keys. Provides no confidentiality at all.
#[derive(Debug, Clone)]
pub struct PassthroughCipher {
    blob: String,
    capacity: usize,
}

impl PassthroughCipher {
    /// Create a passthrough cipher identified by `label`.
    pub fn new(label: &str) -> Self {
        Self {
            blob: STANDARD.encode(label.as_bytes()),
            capacity: PASSTHROUGH_DEFAULT_CAPACITY,
        }
    }

    /// Override the simulated single-operation capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Cipher for PassthroughCipher {
    type PublicKey = String;

    fn local_public_key(&self) -> &str {
        &self.blob
    }

    fn parse_public_key(&self, blob: &str) -> Result<String, KeyFormatError> {
        let blob = blob.trim();
        if blob.is_empty() {
            return Err(KeyFormatError::Empty);
        }
        let raw = STANDARD
            .decode(blob)
            .map_err(|_| KeyFormatError::InvalidEncoding)?;
        String::from_utf8(raw).map_err(|_| KeyFormatError::InvalidStructure)
    }

    fn encrypt(&self, plaintext: &str, _recipient: &String) -> Result<String, CryptoError> {
        if plaintext.len() > self.capacity {
            return Err(CryptoError::PlaintextTooLong {
                len: plaintext.len(),
                max: self.capacity,
            });
        }
        Ok(format!("{PASSTHROUGH_PREFIX}{plaintext}"))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        ciphertext
            .strip_prefix(PASSTHROUGH_PREFIX)
            .map(str::to_owned)
            .ok_or(CryptoError::DecryptionFailed)
    }

    fn capacity(&self, _recipient: &String) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_round_trip() {
        let relay = PassthroughCipher::new("relay");
        let key = relay.parse_public_key(relay.local_public_key()).unwrap();
        assert_eq!(key, "relay");

        let ct = relay.encrypt("hi there", &key).unwrap();
        assert_eq!(ct, "ENCRYPTED: hi there");
        assert_eq!(relay.decrypt(&ct).unwrap(), "hi there");
    }

    #[test]
    fn test_passthrough_rejects_unprefixed() {
        let c = PassthroughCipher::new("x");
        assert_eq!(c.decrypt("garbage").unwrap_err(), CryptoError::DecryptionFailed);
    }

    #[test]
    fn test_passthrough_capacity() {
        let c = PassthroughCipher::new("x").with_capacity(4);
        let key = "peer".to_string();
        assert!(c.encrypt("1234", &key).is_ok());
        assert_eq!(
            c.encrypt("12345", &key).unwrap_err(),
            CryptoError::PlaintextTooLong { len: 5, max: 4 }
        );
        assert_eq!(c.capacity(&key), 4);
    }

    #[test]
    fn test_passthrough_bad_blobs() {
        let c = PassthroughCipher::new("x");
        assert_eq!(c.parse_public_key("  ").unwrap_err(), KeyFormatError::Empty);
        assert_eq!(
            c.parse_public_key("not*base64").unwrap_err(),
            KeyFormatError::InvalidEncoding
        );
    }

    #[test]
    fn test_fingerprint_stable_and_short() {
        let a = fingerprint("aGVsbG8=");
        assert_eq!(a.len(), 16);
        assert_eq!(a, fingerprint("aGVsbG8=\n"));
        assert_ne!(a, fingerprint("d29ybGQ="));
    }
}
