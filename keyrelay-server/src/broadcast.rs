//! Fan-out re-encryption.
//!
//! One decrypted message in, one ciphertext per other session out, each
//! under that recipient's own key. Failures are per recipient: a bad key or
//! a stuck peer costs that peer its copy and nobody else.

use std::sync::Arc;

use keyrelay_core::Cipher;
use tracing::{debug, warn};

use crate::registry::{SessionId, SessionRegistry};

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the line.
    pub delivered: usize,
    /// Recipients still handshaking (no key yet).
    pub skipped: usize,
    /// Recipients lost to an encryption or queueing failure.
    pub failed: usize,
}

/// Re-encrypts relayed messages for every registered session.
pub struct Broadcaster<C: Cipher> {
    cipher: Arc<C>,
    registry: Arc<SessionRegistry<C::PublicKey>>,
}

impl<C: Cipher> Broadcaster<C> {
    /// Broadcast over `registry` using `cipher`.
    pub fn new(cipher: Arc<C>, registry: Arc<SessionRegistry<C::PublicKey>>) -> Self {
        Self { cipher, registry }
    }

    /// Deliver `plaintext` to every session except `origin`.
    ///
    /// Never blocks on a slow recipient: lines are queued with `try_send` and
    /// a full queue counts as a failure for that recipient only.
    pub fn broadcast(&self, plaintext: &str, origin: SessionId) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.registry.for_each(|session| {
            if session.id() == origin {
                return;
            }

            let Some(key) = session.remote_key() else {
                report.skipped += 1;
                return;
            };

            let line = match self.cipher.encrypt(plaintext, key) {
                Ok(line) => line,
                Err(e) => {
                    warn!(session = session.id(), error = %e, "re-encryption failed, recipient skipped");
                    report.failed += 1;
                    return;
                }
            };

            match session.deliver(line) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session = session.id(), peer = %session.peer_addr(), error = %e, "delivery failed");
                    report.failed += 1;
                }
            }
        });

        debug!(
            origin,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }
}
