//! keyrelay relay server
//!
//! Accepts peers over TCP, exchanges RSA public keys with each, then
//! decrypts every message a peer sends and re-encrypts it individually for
//! every other connected peer.
//!
//! # Isolation
//!
//! - A bad handshake closes only that connection
//! - A bad ciphertext drops only that message
//! - A failed delivery costs only that recipient its copy
//! - A transport error ends only that session; the accept loop keeps going

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod listener;
pub mod registry;
mod session;

use std::sync::Arc;

use keyrelay_core::Cipher;
use tokio::net::TcpListener;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::RelayConfig;
pub use error::RelayError;
pub use listener::RelayListener;
pub use registry::{DeliveryError, SessionHandle, SessionId, SessionRegistry};

/// Serve on `listener` with default settings until the task is dropped.
pub async fn run_relay<C: Cipher>(listener: TcpListener, cipher: Arc<C>) {
    RelayListener::from_listener(listener, RelayConfig::default(), cipher)
        .run()
        .await
}
