//! Protocol errors.
//!
//! Crypto and frame errors are per-message: the offending message is dropped
//! and the session carries on. Handshake errors close the session before it
//! ever relays. Protocol errors are programmer errors in how a state machine
//! is driven.

use thiserror::Error;

/// Encryption, decryption or key generation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Plaintext does not fit in a single cipher operation.
    #[error("plaintext is {len} bytes, cipher capacity is {max}")]
    PlaintextTooLong {
        /// Length of the rejected plaintext in bytes.
        len: usize,
        /// Single-operation capacity for the recipient key.
        max: usize,
    },

    /// Ciphertext line is not valid base64.
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,

    /// Wrong key, padding mismatch or corrupted ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The cipher rejected the plaintext or key.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Decrypted bytes are not UTF-8.
    #[error("plaintext is not valid utf-8")]
    InvalidUtf8,

    /// Key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// A public key blob could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFormatError {
    /// Blob is empty.
    #[error("public key is empty")]
    Empty,

    /// Blob is not valid base64.
    #[error("public key is not valid base64")]
    InvalidEncoding,

    /// Decoded bytes are not an RSA SubjectPublicKeyInfo.
    #[error("public key is not a valid key-info structure")]
    InvalidStructure,

    /// Our own key could not be DER-encoded.
    #[error("public key could not be encoded")]
    Encode,
}

/// Session state machine misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The event is not valid in the current state.
    #[error("{event} is not valid in state {from}")]
    InvalidTransition {
        /// State the session was in.
        from: &'static str,
        /// Event that was attempted.
        event: &'static str,
    },

    /// Session has already closed.
    #[error("session closed")]
    SessionClosed,

    /// The remote public key has not been learned yet.
    #[error("remote public key is not known yet")]
    RemoteKeyUnknown,
}

/// The two-line key exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Stream ended before the key line arrived.
    #[error("connection closed before a public key was received")]
    MissingKey,

    /// The key line did not decode.
    #[error("invalid public key: {0}")]
    KeyFormat(#[from] KeyFormatError),

    /// Handshake attempted in the wrong state.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A line violates the wire framing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Text contains the line delimiter.
    #[error("message contains a line break")]
    ContainsNewline,

    /// Line is longer than the configured maximum.
    #[error("line exceeds {max} bytes")]
    LineTooLong {
        /// Configured maximum line length.
        max: usize,
    },
}

/// A single message could not be sent or received.
///
/// Crypto and frame failures drop just that message. Protocol failures mean
/// the session is not in a state to carry messages at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Text cannot be framed as one line.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Session is not ready or already closed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl MessageError {
    /// Whether the session can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format_is_handshake_subtype() {
        let err: HandshakeError = KeyFormatError::InvalidEncoding.into();
        assert_eq!(err, HandshakeError::KeyFormat(KeyFormatError::InvalidEncoding));
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn test_too_long_reports_sizes() {
        let err = CryptoError::PlaintextTooLong { len: 300, max: 245 };
        let text = err.to_string();
        assert!(text.contains("300"));
        assert!(text.contains("245"));
    }
}
