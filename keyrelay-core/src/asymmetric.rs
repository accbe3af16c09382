//! RSA key pairs and direct per-message encryption.
//!
//! Every message is encrypted with RSA PKCS#1 v1.5 straight under the
//! recipient's long-lived public key. There is no session key, so a message
//! can be at most `modulus_bytes - 11` bytes long.
//!
//! Public keys travel as base64 of their DER SubjectPublicKeyInfo encoding.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::cipher::{fingerprint, Cipher};
use crate::error::{CryptoError, KeyFormatError};

/// Modulus size used when nothing else is configured.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// PKCS#1 v1.5 encryption padding overhead in bytes.
const PKCS1_PADDING_OVERHEAD: usize = 11;

/// A party's RSA key pair.
///
/// Generated once at startup and kept for the life of the process.
/// The private key never leaves this struct.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair with the given modulus size.
    ///
    /// Uses the OS-seeded thread RNG. Failure means the RNG or the bignum
    /// backend is broken; callers treat it as fatal.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Public half.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Private half. Only the owner's decrypt path should touch this.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// Largest plaintext `key` can encrypt in one operation.
pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(PKCS1_PADDING_OVERHEAD)
}

/// Encrypt `plaintext` under `recipient` and base64-encode the ciphertext.
///
/// # Errors
///
/// [`CryptoError::PlaintextTooLong`] if the plaintext exceeds
/// [`max_plaintext_len`]; the message is never truncated.
pub fn encrypt(plaintext: &str, recipient: &RsaPublicKey) -> Result<String, CryptoError> {
    let max = max_plaintext_len(recipient);
    if plaintext.len() > max {
        return Err(CryptoError::PlaintextTooLong {
            len: plaintext.len(),
            max,
        });
    }

    let mut rng = rand::thread_rng();
    let ciphertext = recipient
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
        .map_err(|e| match e {
            rsa::Error::MessageTooLong => CryptoError::PlaintextTooLong {
                len: plaintext.len(),
                max,
            },
            _ => CryptoError::EncryptionFailed,
        })?;

    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt a base64 ciphertext line with the owner's private key.
pub fn decrypt(ciphertext: &str, own: &RsaPrivateKey) -> Result<String, CryptoError> {
    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| CryptoError::InvalidEncoding)?;

    let plaintext = Zeroizing::new(
        own.decrypt(Pkcs1v15Encrypt, &raw)
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );

    std::str::from_utf8(&plaintext)
        .map(str::to_owned)
        .map_err(|_| CryptoError::InvalidUtf8)
}

/// Encode a public key as a wire blob.
pub fn serialize_public_key(key: &RsaPublicKey) -> Result<String, KeyFormatError> {
    let der = key
        .to_public_key_der()
        .map_err(|_| KeyFormatError::Encode)?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Decode a wire blob into a public key.
pub fn deserialize_public_key(blob: &str) -> Result<RsaPublicKey, KeyFormatError> {
    let blob = blob.trim();
    if blob.is_empty() {
        return Err(KeyFormatError::Empty);
    }
    let der = STANDARD
        .decode(blob)
        .map_err(|_| KeyFormatError::InvalidEncoding)?;
    RsaPublicKey::from_public_key_der(&der).map_err(|_| KeyFormatError::InvalidStructure)
}

/// The production cipher: RSA under each hop's public key.
pub struct RsaCipher {
    keys: KeyPair,
    blob: String,
}

impl RsaCipher {
    /// Wrap a key pair, caching its serialized public key.
    pub fn new(keys: KeyPair) -> Result<Self, KeyFormatError> {
        let blob = serialize_public_key(keys.public_key())?;
        Ok(Self { keys, blob })
    }

    /// Generate a key pair and wrap it.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let keys = KeyPair::generate(bits)?;
        // A freshly generated key always encodes.
        Self::new(keys).map_err(|e| CryptoError::KeyGeneration(e.to_string()))
    }

    /// Underlying key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.keys
    }
}

impl fmt::Debug for RsaCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaCipher")
            .field("bits", &self.keys.bits())
            .field("fingerprint", &fingerprint(&self.blob))
            .finish()
    }
}

impl Cipher for RsaCipher {
    type PublicKey = RsaPublicKey;

    fn local_public_key(&self) -> &str {
        &self.blob
    }

    fn parse_public_key(&self, blob: &str) -> Result<RsaPublicKey, KeyFormatError> {
        deserialize_public_key(blob)
    }

    fn encrypt(&self, plaintext: &str, recipient: &RsaPublicKey) -> Result<String, CryptoError> {
        encrypt(plaintext, recipient)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        decrypt(ciphertext, self.keys.private_key())
    }

    fn capacity(&self, recipient: &RsaPublicKey) -> usize {
        max_plaintext_len(recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024-bit keys keep generation fast; the behaviour is the same at 2048.
    const TEST_BITS: usize = 1024;

    fn keys() -> KeyPair {
        KeyPair::generate(TEST_BITS).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let kp = keys();
        let longest = "x".repeat(max_plaintext_len(kp.public_key()));
        for msg in ["hello", "", "ünïcödé ✓", longest.as_str()] {
            let ct = encrypt(msg, kp.public_key()).unwrap();
            assert_eq!(decrypt(&ct, kp.private_key()).unwrap(), msg);
        }
    }

    #[test]
    fn test_capacity_matches_modulus() {
        let kp = keys();
        assert_eq!(kp.bits(), TEST_BITS);
        assert_eq!(max_plaintext_len(kp.public_key()), TEST_BITS / 8 - 11);
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let kp = keys();
        let max = max_plaintext_len(kp.public_key());
        let msg = "y".repeat(max + 1);
        let err = encrypt(&msg, kp.public_key()).unwrap_err();
        assert_eq!(err, CryptoError::PlaintextTooLong { len: max + 1, max });
    }

    #[test]
    fn test_ciphertext_is_randomized() {
        let kp = keys();
        let a = encrypt("same", kp.public_key()).unwrap();
        let b = encrypt("same", kp.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = keys();
        let bob = keys();
        let ct = encrypt("for alice", alice.public_key()).unwrap();
        assert_eq!(
            decrypt(&ct, bob.private_key()).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_malformed_ciphertext() {
        let kp = keys();
        assert_eq!(
            decrypt("not base64 !!", kp.private_key()).unwrap_err(),
            CryptoError::InvalidEncoding
        );
        assert_eq!(
            decrypt(&STANDARD.encode([1u8, 2, 3]), kp.private_key()).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_public_key_blob_round_trip() {
        let kp = keys();
        let blob = serialize_public_key(kp.public_key()).unwrap();
        assert!(!blob.contains('\n'));
        let parsed = deserialize_public_key(&blob).unwrap();
        assert_eq!(&parsed, kp.public_key());
    }

    #[test]
    fn test_malformed_blobs() {
        assert_eq!(deserialize_public_key("").unwrap_err(), KeyFormatError::Empty);
        assert_eq!(
            deserialize_public_key("%%%").unwrap_err(),
            KeyFormatError::InvalidEncoding
        );
        assert_eq!(
            deserialize_public_key(&STANDARD.encode(b"definitely not DER")).unwrap_err(),
            KeyFormatError::InvalidStructure
        );
    }

    #[test]
    fn test_rsa_cipher_between_parties() {
        let relay = RsaCipher::generate(TEST_BITS).unwrap();
        let peer = RsaCipher::generate(TEST_BITS).unwrap();

        let relay_key = peer.parse_public_key(relay.local_public_key()).unwrap();
        let ct = peer.encrypt("to the relay", &relay_key).unwrap();
        assert_eq!(relay.decrypt(&ct).unwrap(), "to the relay");

        // The sender cannot read its own outbound line.
        assert!(peer.decrypt(&ct).is_err());
    }

    #[test]
    fn test_debug_hides_key_material() {
        let cipher = RsaCipher::generate(TEST_BITS).unwrap();
        let dbg = format!("{:?}", cipher);
        assert!(dbg.contains("fingerprint"));
        assert!(!dbg.contains(cipher.local_public_key()));
    }
}
