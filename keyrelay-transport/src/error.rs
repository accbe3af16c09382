//! Transport errors.

use std::io;

use keyrelay_core::{CryptoError, FrameError, HandshakeError, MessageError, ProtocolError};
use thiserror::Error;

/// Errors that can occur during client operations.
///
/// `Crypto`, `Frame` and `Protocol::RemoteKeyUnknown` reject a single send
/// and leave the client usable. Everything else means the connection is gone.
#[derive(Debug, Error)]
pub enum TransportError {
    // --- Connection & Setup ---
    /// Could not open the TCP connection.
    #[error("connection to {addr} failed")]
    ConnectionFailed {
        /// Address we tried.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Key exchange with the relay failed.
    #[error("handshake failed")]
    Handshake(#[from] HandshakeError),

    // --- Per-message ---
    /// Message could not be encrypted or decrypted.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Message cannot be framed as one line.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Operation not valid in the current state.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // --- Lifecycle & Transport ---
    /// Socket read or write failed.
    #[error("I/O error")]
    Io(#[from] io::Error),
    /// Client has been closed.
    #[error("session terminated")]
    SessionTerminated,
    /// Relay closed the connection.
    #[error("relay disconnected")]
    PeerDisconnected,
}

impl TransportError {
    /// Whether the client is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Crypto(_) | Self::Frame(_) | Self::Protocol(ProtocolError::RemoteKeyUnknown)
        )
    }
}

impl From<MessageError> for TransportError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::Crypto(e) => Self::Crypto(e),
            MessageError::Frame(e) => Self::Frame(e),
            MessageError::Protocol(e) => Self::Protocol(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_errors_keep_their_kind() {
        let e: TransportError = MessageError::from(FrameError::ContainsNewline).into();
        assert!(matches!(e, TransportError::Frame(FrameError::ContainsNewline)));
        assert!(e.is_recoverable());

        let e: TransportError = MessageError::from(ProtocolError::SessionClosed).into();
        assert!(matches!(e, TransportError::Protocol(ProtocolError::SessionClosed)));
        assert!(!e.is_recoverable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(!TransportError::SessionTerminated.is_recoverable());
        assert!(!TransportError::PeerDisconnected.is_recoverable());
        assert!(!TransportError::from(HandshakeError::MissingKey).is_recoverable());
    }

    #[test]
    fn test_connection_failed_names_address() {
        let e = TransportError::ConnectionFailed {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(e.to_string().contains("127.0.0.1:1"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
