//! Per-connection handler task.
//!
//! One task per accepted socket drives a [`RelaySession`] through
//! HANDSHAKING → KEY_EXCHANGED → RELAYING → CLOSED. A second, writer task
//! owns the write half and drains the session's outbound queue, so
//! broadcasts from other sessions never touch this socket directly.
//!
//! Every exit path (stream end, read error, bad handshake, stop request)
//! returns to [`run_session`], which runs the single teardown.

use std::io;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use keyrelay_core::error::MessageError;
use keyrelay_core::{
    fingerprint, Cipher, HandshakeError, Inbound, KeyFormatError, LineCodec, RelaySession,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::{SessionHandle, SessionRegistry};

/// State shared by the accept loop and every session task.
pub(crate) struct RelayContext<C: Cipher> {
    pub(crate) cipher: Arc<C>,
    pub(crate) registry: Arc<SessionRegistry<C::PublicKey>>,
    pub(crate) broadcaster: Broadcaster<C>,
    pub(crate) config: RelayConfig,
}

impl<C: Cipher> RelayContext<C> {
    pub(crate) fn new(cipher: Arc<C>, config: RelayConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&cipher), Arc::clone(&registry));
        Self {
            cipher,
            registry,
            broadcaster,
            config,
        }
    }
}

type LineReader = FramedRead<OwnedReadHalf, LineCodec>;
type LineWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

/// Run one session to completion. The handle must already be registered.
pub(crate) async fn run_session<C: Cipher>(
    stream: TcpStream,
    handle: Arc<SessionHandle<C::PublicKey>>,
    outbound: mpsc::Receiver<String>,
    ctx: Arc<RelayContext<C>>,
) {
    let (read_half, write_half) = stream.into_split();
    let codec = LineCodec::new(ctx.config.max_line_length);
    let mut lines = FramedRead::new(read_half, codec.clone());
    let writer = tokio::spawn(write_loop(
        FramedWrite::new(write_half, codec),
        outbound,
        Arc::clone(&handle),
    ));

    let mut session = RelaySession::<C>::new();
    match drive(&ctx, &handle, &mut session, &mut lines).await {
        Ok(()) => debug!("session finished"),
        Err(e) => info!(error = %e, "session terminated"),
    }

    teardown(&ctx, &handle, &mut session, &writer);
}

async fn drive<C: Cipher>(
    ctx: &RelayContext<C>,
    handle: &SessionHandle<C::PublicKey>,
    session: &mut RelaySession<C>,
    lines: &mut LineReader,
) -> Result<(), RelayError> {
    // HANDSHAKING
    let next = tokio::select! {
        _ = handle.stopped() => return Ok(()),
        next = lines.next() => next.transpose()?,
    };
    let first = match next {
        Some(Inbound::Line(line)) => Some(line),
        Some(Inbound::Oversized) => {
            session.close();
            return Err(HandshakeError::from(KeyFormatError::InvalidStructure).into());
        }
        None => None,
    };
    let reply = session.on_peer_key(first.as_deref(), &ctx.cipher)?;

    // The reply has to be queued before the key is published: once the
    // registry can see a key, broadcasts may start queueing ciphertext.
    handle
        .deliver(reply)
        .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
    if let Some(key) = session.remote_key() {
        handle.set_remote_key(key.clone());
    }
    info!(
        fingerprint = %fingerprint(first.as_deref().unwrap_or_default()),
        "key exchange complete"
    );

    // KEY_EXCHANGED -> RELAYING
    session.start_relaying()?;

    loop {
        let next = tokio::select! {
            _ = handle.stopped() => {
                debug!("stop requested");
                return Ok(());
            }
            next = lines.next() => next,
        };

        let line = match next {
            None => return Ok(()),
            Some(Ok(Inbound::Line(line))) => line,
            Some(Ok(Inbound::Oversized)) => {
                warn!(
                    max = ctx.config.max_line_length,
                    "oversized line discarded"
                );
                continue;
            }
            Some(Err(e)) => return Err(e.into()),
        };

        match session.on_ciphertext(&line, &ctx.cipher) {
            Ok(plaintext) => {
                debug!(len = plaintext.len(), "relaying message");
                ctx.broadcaster.broadcast(&plaintext, handle.id());
            }
            Err(MessageError::Protocol(e)) => return Err(e.into()),
            Err(e) => warn!(error = %e, "undecryptable message dropped"),
        }
    }
}

/// Drain the outbound queue onto the socket.
///
/// A write failure is fatal for the session, so it asks the handler to stop.
async fn write_loop<K>(
    mut sink: LineWriter,
    mut outbound: mpsc::Receiver<String>,
    handle: Arc<SessionHandle<K>>,
) {
    while let Some(line) = outbound.recv().await {
        if let Err(e) = sink.send(line).await {
            warn!(session = handle.id(), error = %e, "write failed");
            handle.stop();
            return;
        }
    }
    let _ = SinkExt::<String>::close(&mut sink).await;
}

/// Close the session and release everything it holds.
///
/// Safe to reach more than once: every step is idempotent and registry
/// removal reports whether this call was the one that removed it.
pub(crate) fn teardown<C: Cipher>(
    ctx: &RelayContext<C>,
    handle: &SessionHandle<C::PublicKey>,
    session: &mut RelaySession<C>,
    writer: &JoinHandle<()>,
) -> bool {
    session.close();
    handle.mark_closed();
    let removed = ctx.registry.remove(handle.id());
    // Dropping the writer's half shuts down our side of the socket.
    writer.abort();
    if removed {
        info!(remaining = ctx.registry.len(), "session closed");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_core::PassthroughCipher;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn test_teardown_twice_removes_once() {
        let ctx = RelayContext::new(
            Arc::new(PassthroughCipher::new("relay")),
            RelayConfig::default(),
        );
        let (tx, _rx) = mpsc::channel(1);
        let handle = Arc::new(SessionHandle::new(
            ctx.registry.next_id(),
            SocketAddr::from(([127, 0, 0, 1], 6000)),
            tx,
        ));
        ctx.registry.add(Arc::clone(&handle));

        let writer = tokio::spawn(std::future::pending::<()>());
        let mut session = RelaySession::<PassthroughCipher>::new();

        assert!(teardown(&ctx, &handle, &mut session, &writer));
        assert!(!teardown(&ctx, &handle, &mut session, &writer));
        assert!(ctx.registry.is_empty());
        assert!(handle.is_closed());
    }
}
