//! keyrelay protocol core
//!
//! Everything in here is pure: no sockets, no tasks, no clocks.
//!
//! This crate provides:
//! - RSA key pairs, public key (de)serialization and direct per-message encryption
//! - The [`Cipher`] seam that lets relay and clients swap in the passthrough cipher
//! - Line framing rules for the newline-delimited wire protocol, and the
//!   codec that applies them to a byte stream
//! - The relay-side and peer-side session state machines
//!
//! # Protocol Invariants
//!
//! - Each message is encrypted directly under the long-lived key of the next hop
//! - Plaintext never exceeds the cipher's single-operation capacity; oversized
//!   input is an error, never truncated
//! - A malformed key during the handshake closes that session before relaying
//! - A malformed ciphertext or an over-long line is dropped; the session keeps going

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod asymmetric;
pub mod cipher;
pub mod codec;
pub mod error;
pub mod frame;
pub mod state;

pub use asymmetric::{KeyPair, RsaCipher, DEFAULT_KEY_BITS};
pub use cipher::{fingerprint, Cipher, PassthroughCipher};
pub use codec::{Inbound, LineCodec};
pub use error::{
    CryptoError, FrameError, HandshakeError, KeyFormatError, MessageError, ProtocolError,
};
pub use state::{PeerSession, PeerState, RelaySession, RelayState};
