//! Session state machines.
//!
//! Relay side: HANDSHAKING → KEY_EXCHANGED → RELAYING → CLOSED
//! Peer side:  CONNECTING → HANDSHAKING → READY → CLOSED
//!
//! Both machines are pure. The server and transport crates feed them lines
//! read from the socket and write whatever they hand back. A failed
//! handshake closes the session; a bad message never does.

use std::fmt;

use zeroize::Zeroizing;

use crate::cipher::Cipher;
use crate::error::{HandshakeError, MessageError, ProtocolError};
use crate::frame::validate_plaintext;

/// Relay-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for the peer's public key line.
    Handshaking,
    /// Keys exchanged, about to relay.
    KeyExchanged,
    /// Reading ciphertext lines and broadcasting them.
    Relaying,
    /// Terminal.
    Closed,
}

impl RelayState {
    fn name(self) -> &'static str {
        match self {
            Self::Handshaking => "HANDSHAKING",
            Self::KeyExchanged => "KEY_EXCHANGED",
            Self::Relaying => "RELAYING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The relay's view of one connected peer.
pub struct RelaySession<C: Cipher> {
    state: RelayState,
    remote_key: Option<C::PublicKey>,
}

impl<C: Cipher> RelaySession<C> {
    /// New session, waiting for the peer's key.
    pub fn new() -> Self {
        Self {
            state: RelayState::Handshaking,
            remote_key: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Peer public key, once the handshake has succeeded.
    pub fn remote_key(&self) -> Option<&C::PublicKey> {
        self.remote_key.as_ref()
    }

    /// Process the first line from the peer.
    ///
    /// `line` is `None` when the stream ended before a key arrived. On success
    /// returns the relay's own key blob, which must be written back before any
    /// ciphertext. Any failure closes the session.
    ///
    /// Transitions: Handshaking → KeyExchanged, Handshaking → Closed
    pub fn on_peer_key(&mut self, line: Option<&str>, cipher: &C) -> Result<String, HandshakeError> {
        if self.state != RelayState::Handshaking {
            let from = self.state.name();
            self.close();
            return Err(ProtocolError::InvalidTransition {
                from,
                event: "peer key",
            }
            .into());
        }

        let Some(line) = line else {
            self.close();
            return Err(HandshakeError::MissingKey);
        };

        match cipher.parse_public_key(line) {
            Ok(key) => {
                self.remote_key = Some(key);
                self.state = RelayState::KeyExchanged;
                Ok(cipher.local_public_key().to_owned())
            }
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    /// Transitions: KeyExchanged → Relaying
    pub fn start_relaying(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            RelayState::KeyExchanged => {
                self.state = RelayState::Relaying;
                Ok(())
            }
            RelayState::Closed => Err(ProtocolError::SessionClosed),
            other => Err(ProtocolError::InvalidTransition {
                from: other.name(),
                event: "start relaying",
            }),
        }
    }

    /// Decrypt one ciphertext line from the peer.
    ///
    /// Crypto failures leave the state untouched so the caller can log and
    /// keep reading.
    pub fn on_ciphertext(
        &mut self,
        line: &str,
        cipher: &C,
    ) -> Result<Zeroizing<String>, MessageError> {
        match self.state {
            RelayState::Relaying => Ok(Zeroizing::new(cipher.decrypt(line)?)),
            RelayState::Closed => Err(ProtocolError::SessionClosed.into()),
            other => Err(ProtocolError::InvalidTransition {
                from: other.name(),
                event: "ciphertext",
            }
            .into()),
        }
    }

    /// Enter CLOSED. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if self.state == RelayState::Closed {
            return false;
        }
        self.state = RelayState::Closed;
        self.remote_key = None;
        true
    }
}

impl<C: Cipher> Default for RelaySession<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cipher> fmt::Debug for RelaySession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("state", &self.state)
            .field("has_remote_key", &self.remote_key.is_some())
            .finish()
    }
}

/// Client-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Opening the transport.
    Connecting,
    /// Own key sent, waiting for the relay's.
    Handshaking,
    /// Sending and receiving messages.
    Ready,
    /// Terminal.
    Closed,
}

impl PeerState {
    fn name(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Handshaking => "HANDSHAKING",
            Self::Ready => "READY",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A client's view of its relay connection.
pub struct PeerSession<C: Cipher> {
    state: PeerState,
    relay_key: Option<C::PublicKey>,
}

impl<C: Cipher> PeerSession<C> {
    /// New session, not yet connected.
    pub fn new() -> Self {
        Self {
            state: PeerState::Connecting,
            relay_key: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Relay public key, once received.
    pub fn relay_key(&self) -> Option<&C::PublicKey> {
        self.relay_key.as_ref()
    }

    /// Transport is open. Returns our key blob, the first line to send.
    ///
    /// Transitions: Connecting → Handshaking
    pub fn on_connected(&mut self, cipher: &C) -> Result<String, ProtocolError> {
        match self.state {
            PeerState::Connecting => {
                self.state = PeerState::Handshaking;
                Ok(cipher.local_public_key().to_owned())
            }
            PeerState::Closed => Err(ProtocolError::SessionClosed),
            other => {
                self.close();
                Err(ProtocolError::InvalidTransition {
                    from: other.name(),
                    event: "connected",
                })
            }
        }
    }

    /// Process the relay's key line. `None` means the relay hung up.
    ///
    /// Transitions: Handshaking → Ready, Handshaking → Closed
    pub fn on_relay_key(&mut self, line: Option<&str>, cipher: &C) -> Result<(), HandshakeError> {
        if self.state != PeerState::Handshaking {
            let from = self.state.name();
            self.close();
            return Err(ProtocolError::InvalidTransition {
                from,
                event: "relay key",
            }
            .into());
        }

        let Some(line) = line else {
            self.close();
            return Err(HandshakeError::MissingKey);
        };

        match cipher.parse_public_key(line) {
            Ok(key) => {
                self.relay_key = Some(key);
                self.state = PeerState::Ready;
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    /// Encrypt user text for the relay, producing one wire line.
    ///
    /// Rejected without touching the state when the relay key is unknown,
    /// the text spans lines, or it does not fit in one cipher operation.
    pub fn encrypt_outgoing(&self, text: &str, cipher: &C) -> Result<String, MessageError> {
        if self.state == PeerState::Closed {
            return Err(ProtocolError::SessionClosed.into());
        }
        let key = self
            .relay_key
            .as_ref()
            .ok_or(ProtocolError::RemoteKeyUnknown)?;
        let text = validate_plaintext(text)?;
        Ok(cipher.encrypt(text, key)?)
    }

    /// Decrypt a line the relay re-encrypted for us.
    pub fn decrypt_incoming(
        &self,
        line: &str,
        cipher: &C,
    ) -> Result<Zeroizing<String>, MessageError> {
        match self.state {
            PeerState::Ready => Ok(Zeroizing::new(cipher.decrypt(line)?)),
            PeerState::Closed => Err(ProtocolError::SessionClosed.into()),
            other => Err(ProtocolError::InvalidTransition {
                from: other.name(),
                event: "ciphertext",
            }
            .into()),
        }
    }

    /// Enter CLOSED. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if self.state == PeerState::Closed {
            return false;
        }
        self.state = PeerState::Closed;
        self.relay_key = None;
        true
    }
}

impl<C: Cipher> Default for PeerSession<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cipher> fmt::Debug for PeerSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("state", &self.state)
            .field("has_relay_key", &self.relay_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::PassthroughCipher;
    use crate::error::{CryptoError, FrameError, KeyFormatError};

    type Relay = RelaySession<PassthroughCipher>;
    type Peer = PeerSession<PassthroughCipher>;

    fn handshake(relay_cipher: &PassthroughCipher, peer_cipher: &PassthroughCipher) -> (Relay, Peer) {
        let mut relay = Relay::new();
        let mut peer = Peer::new();

        let hello = peer.on_connected(peer_cipher).unwrap();
        assert_eq!(peer.state(), PeerState::Handshaking);

        let reply = relay.on_peer_key(Some(&hello), relay_cipher).unwrap();
        assert_eq!(relay.state(), RelayState::KeyExchanged);
        assert_eq!(relay.remote_key().map(String::as_str), Some("peer"));

        peer.on_relay_key(Some(&reply), peer_cipher).unwrap();
        assert_eq!(peer.state(), PeerState::Ready);

        relay.start_relaying().unwrap();
        assert_eq!(relay.state(), RelayState::Relaying);
        (relay, peer)
    }

    #[test]
    fn test_full_handshake_and_message() {
        let relay_cipher = PassthroughCipher::new("relay");
        let peer_cipher = PassthroughCipher::new("peer");
        let (mut relay, peer) = handshake(&relay_cipher, &peer_cipher);

        let line = peer.encrypt_outgoing("hello", &peer_cipher).unwrap();
        let text = relay.on_ciphertext(&line, &relay_cipher).unwrap();
        assert_eq!(text.as_str(), "hello");

        let back = relay_cipher.encrypt("hi", relay.remote_key().unwrap()).unwrap();
        assert_eq!(peer.decrypt_incoming(&back, &peer_cipher).unwrap().as_str(), "hi");
    }

    #[test]
    fn test_bad_peer_key_closes_relay_session() {
        let cipher = PassthroughCipher::new("relay");
        let mut relay = Relay::new();
        let err = relay.on_peer_key(Some("***"), &cipher).unwrap_err();
        assert_eq!(err, HandshakeError::KeyFormat(KeyFormatError::InvalidEncoding));
        assert_eq!(relay.state(), RelayState::Closed);
        assert!(relay.start_relaying().is_err());
    }

    #[test]
    fn test_missing_peer_key_closes_relay_session() {
        let cipher = PassthroughCipher::new("relay");
        let mut relay = Relay::new();
        assert_eq!(relay.on_peer_key(None, &cipher), Err(HandshakeError::MissingKey));
        assert_eq!(relay.state(), RelayState::Closed);
    }

    #[test]
    fn test_bad_ciphertext_keeps_relaying() {
        let relay_cipher = PassthroughCipher::new("relay");
        let peer_cipher = PassthroughCipher::new("peer");
        let (mut relay, peer) = handshake(&relay_cipher, &peer_cipher);

        let err = relay.on_ciphertext("garbage", &relay_cipher).unwrap_err();
        assert_eq!(err, MessageError::Crypto(CryptoError::DecryptionFailed));
        assert!(err.is_recoverable());
        assert_eq!(relay.state(), RelayState::Relaying);

        let line = peer.encrypt_outgoing("still here", &peer_cipher).unwrap();
        assert_eq!(relay.on_ciphertext(&line, &relay_cipher).unwrap().as_str(), "still here");
    }

    #[test]
    fn test_ciphertext_before_handshake_rejected() {
        let cipher = PassthroughCipher::new("relay");
        let mut relay = Relay::new();
        let err = relay.on_ciphertext("ENCRYPTED: x", &cipher).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(relay.state(), RelayState::Handshaking);
    }

    #[test]
    fn test_second_peer_key_is_a_violation() {
        let relay_cipher = PassthroughCipher::new("relay");
        let peer_cipher = PassthroughCipher::new("peer");
        let (mut relay, _peer) = handshake(&relay_cipher, &peer_cipher);
        let again = relay.on_peer_key(Some(peer_cipher.local_public_key()), &relay_cipher);
        assert!(matches!(again, Err(HandshakeError::Protocol(_))));
        assert_eq!(relay.state(), RelayState::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut relay = Relay::new();
        assert!(relay.close());
        assert!(!relay.close());

        let mut peer = Peer::new();
        assert!(peer.close());
        assert!(!peer.close());
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[test]
    fn test_send_before_relay_key_rejected() {
        let cipher = PassthroughCipher::new("peer");
        let mut peer = Peer::new();
        peer.on_connected(&cipher).unwrap();
        assert_eq!(
            peer.encrypt_outgoing("too early", &cipher),
            Err(MessageError::Protocol(ProtocolError::RemoteKeyUnknown))
        );
        assert_eq!(peer.state(), PeerState::Handshaking);
    }

    #[test]
    fn test_send_validation_keeps_ready() {
        let relay_cipher = PassthroughCipher::new("relay");
        let peer_cipher = PassthroughCipher::new("peer").with_capacity(8);
        let (_relay, peer) = handshake(&relay_cipher, &peer_cipher);

        assert_eq!(
            peer.encrypt_outgoing("two\nlines", &peer_cipher),
            Err(MessageError::Frame(FrameError::ContainsNewline))
        );
        assert_eq!(
            peer.encrypt_outgoing("far too long", &peer_cipher),
            Err(MessageError::Crypto(CryptoError::PlaintextTooLong { len: 12, max: 8 }))
        );
        assert_eq!(peer.state(), PeerState::Ready);
    }

    #[test]
    fn test_bad_relay_key_closes_peer() {
        let cipher = PassthroughCipher::new("peer");
        let mut peer = Peer::new();
        peer.on_connected(&cipher).unwrap();
        assert!(peer.on_relay_key(Some(""), &cipher).is_err());
        assert_eq!(peer.state(), PeerState::Closed);
        assert_eq!(
            peer.encrypt_outgoing("x", &cipher),
            Err(MessageError::Protocol(ProtocolError::SessionClosed))
        );
    }

    #[test]
    fn test_connect_twice_is_a_violation() {
        let cipher = PassthroughCipher::new("peer");
        let mut peer = Peer::new();
        peer.on_connected(&cipher).unwrap();
        assert!(peer.on_connected(&cipher).is_err());
        assert_eq!(peer.state(), PeerState::Closed);
    }
}
