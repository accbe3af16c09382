//! keyrelay Transport
//!
//! Async client library for talking to a keyrelay relay.
//!
//! This crate wraps `keyrelay-core` and provides [`PeerClient`]: connect,
//! exchange public keys, then send text encrypted for the relay and receive
//! text the relay re-encrypted for us.
//!
//! # Behavior
//!
//! - **Errors stay local**: an oversized or multi-line message is rejected
//!   and the client stays usable. Only transport failures close it.
//! - **Exit command**: sending `exit` (any case) closes the client instead of
//!   sending anything.
//! - **Push delivery**: received messages go to a [`MessageObserver`] from a
//!   background task, so sending never waits on receiving.
//! - **Zeroization**: received plaintext is handed out as [`Message`], which
//!   zeroizes its buffer on drop.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod observer;
mod relay;

pub use client::PeerClient;
pub use config::ClientConfig;
pub use error::TransportError;
pub use message::Message;
pub use observer::{observer_fn, FnObserver, MessageObserver};
