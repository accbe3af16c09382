//! Peer client API.
//!
//! The main public interface for talking to a relay.
//!
//! # Lifecycle
//!
//! - `connect()` opens the socket and exchanges keys before returning, so a
//!   `PeerClient` you hold has always completed the handshake
//! - A background task reads, decrypts and hands messages to the observer
//! - `send_text()` rejects bad messages without closing the client; a write
//!   failure closes it
//! - When the relay hangs up, the receive task closes the session and shuts
//!   our write half, so the socket is fully released without a `close()`
//! - `close()` is idempotent; `Drop` stops the background task

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use keyrelay_core::error::MessageError;
use keyrelay_core::frame::Outgoing;
use keyrelay_core::{fingerprint, Cipher, Inbound, PeerSession, PeerState};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::message::Message;
use crate::observer::MessageObserver;
use crate::relay::{LineConnection, LineReader, LineWriter};

type SharedSession<C> = Arc<Mutex<PeerSession<C>>>;
/// Taken (and shut down) by whichever side closes first.
type SharedWriter = Arc<AsyncMutex<Option<LineWriter>>>;

/// A connection to a relay.
///
/// Does not implement `Clone`; there is one writer per connection.
pub struct PeerClient<C: Cipher> {
    cipher: Arc<C>,
    session: SharedSession<C>,
    writer: SharedWriter,
    reader: Option<JoinHandle<()>>,
    relay_fingerprint: String,
}

impl<C: Cipher> PeerClient<C> {
    /// Connect to the relay and exchange public keys.
    ///
    /// This performs:
    /// 1. TCP connect to `config.relay_addr`
    /// 2. Send our public key blob
    /// 3. Read the relay's blob
    /// 4. Start the receive task feeding `observer`
    ///
    /// No retries. A failed handshake leaves nothing running.
    pub async fn connect<O: MessageObserver>(
        config: &ClientConfig,
        cipher: Arc<C>,
        observer: O,
    ) -> Result<Self, TransportError> {
        let mut session = PeerSession::<C>::new();
        let mut conn = LineConnection::connect(&config.relay_addr, config.max_line_length).await?;

        let blob = session.on_connected(&cipher)?;
        conn.send_line(&blob).await?;

        let reply = conn.recv_line().await?;
        session.on_relay_key(reply.as_deref(), &cipher)?;
        let relay_fingerprint = fingerprint(reply.as_deref().unwrap_or_default());
        info!(
            relay = %config.relay_addr,
            fingerprint = %relay_fingerprint,
            "connected to relay"
        );

        let (lines, writer) = conn.into_split();
        let session = Arc::new(Mutex::new(session));
        let writer = Arc::new(AsyncMutex::new(Some(writer)));
        let span = info_span!("receive", relay = %config.relay_addr);
        let reader = tokio::spawn(
            read_loop(
                lines,
                Arc::clone(&cipher),
                Arc::clone(&session),
                Arc::clone(&writer),
                observer,
            )
            .instrument(span),
        );

        Ok(Self {
            cipher,
            session,
            writer,
            reader: Some(reader),
            relay_fingerprint,
        })
    }

    /// Encrypt `text` for the relay and send it.
    ///
    /// `exit` (any case, surrounding whitespace ignored) closes the client
    /// instead and sends nothing.
    ///
    /// # Errors
    ///
    /// - `Frame` / `Crypto`: the text spans lines or is too long; nothing was
    ///   sent and the client is still usable
    /// - `SessionTerminated`: the client is closed
    /// - `Io`: the write failed; the client is now closed
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let text = match Outgoing::parse(text) {
            Outgoing::Exit => {
                debug!("exit requested");
                self.close().await;
                return Ok(());
            }
            Outgoing::Message(text) => text,
        };

        if !self.is_active() {
            return Err(TransportError::SessionTerminated);
        }
        let line = lock(&self.session).encrypt_outgoing(text, &self.cipher)?;

        let sent = match self.writer.lock().await.as_mut() {
            Some(writer) => writer.send(line).await,
            None => return Err(TransportError::SessionTerminated),
        };
        if let Err(e) = sent {
            warn!(error = %e, "write to relay failed");
            self.close().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether the client can still send.
    ///
    /// Turns false after `close()`, a failed write, `exit`, or the relay
    /// hanging up.
    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Ready
    }

    /// Current protocol state.
    pub fn state(&self) -> PeerState {
        lock(&self.session).state()
    }

    /// Fingerprint of the relay's public key, for out-of-band comparison
    /// with what the relay logs at startup.
    pub fn relay_fingerprint(&self) -> &str {
        &self.relay_fingerprint
    }

    /// Close the connection.
    ///
    /// Shuts down the write half and stops the receive task. Safe to call
    /// more than once.
    pub async fn close(&mut self) {
        lock(&self.session).close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if release(&self.writer).await {
            info!("disconnected from relay");
        }
    }
}

impl<C: Cipher> Drop for PeerClient<C> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl<C: Cipher> std::fmt::Debug for PeerClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient")
            .field("state", &self.state())
            .field("relay_fingerprint", &self.relay_fingerprint)
            .finish()
    }
}

/// Read, decrypt and deliver until the relay hangs up.
async fn read_loop<C: Cipher, O: MessageObserver>(
    mut lines: LineReader,
    cipher: Arc<C>,
    session: SharedSession<C>,
    writer: SharedWriter,
    observer: O,
) {
    loop {
        let line = match lines.next().await {
            None => {
                info!("relay closed the connection");
                break;
            }
            Some(Ok(Inbound::Line(line))) => line,
            Some(Ok(Inbound::Oversized)) => {
                warn!("oversized line from relay discarded");
                continue;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read from relay failed");
                break;
            }
        };

        let decrypted = lock(&session).decrypt_incoming(&line, &cipher);
        match decrypted {
            Ok(text) => observer.on_message(Message::new(text)),
            Err(MessageError::Protocol(e)) => {
                debug!(error = %e, "receive stopped");
                return;
            }
            Err(e) => warn!(error = %e, "undecryptable message dropped"),
        }
    }

    let closed_here = lock(&session).close();
    if release(&writer).await {
        debug!("write half shut down");
    }
    if closed_here {
        observer.on_closed();
    }
}

/// Take the writer and shut it down. Returns `false` if it was already gone.
async fn release(writer: &AsyncMutex<Option<LineWriter>>) -> bool {
    let Some(mut sink) = writer.lock().await.take() else {
        return false;
    };
    // Best effort: the relay may already be gone.
    let _ = SinkExt::<String>::close(&mut sink).await;
    true
}

fn lock<C: Cipher>(session: &Mutex<PeerSession<C>>) -> MutexGuard<'_, PeerSession<C>> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
