//! Relay errors.
//!
//! None of these stop the relay as a whole except [`RelayError::Bind`].
//! Everything else ends one session at most.

use std::io;

use keyrelay_core::{HandshakeError, ProtocolError};
use thiserror::Error;

/// Errors raised while running the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Could not bind the listening socket.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    /// `accept()` failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Read or write on a session socket failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Key exchange with a peer failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Session state machine was driven out of order.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
