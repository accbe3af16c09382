//! Accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_core::{fingerprint, Cipher};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::session::{run_session, RelayContext};

/// Pause after a failed `accept()` so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts peers and spawns a session task for each.
pub struct RelayListener<C: Cipher> {
    listener: TcpListener,
    ctx: Arc<RelayContext<C>>,
}

impl<C: Cipher> RelayListener<C> {
    /// Bind `config.listen` and prepare to serve with `cipher`.
    pub async fn bind(config: RelayConfig, cipher: Arc<C>) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(RelayError::Bind)?;
        Ok(Self::from_listener(listener, config, cipher))
    }

    /// Serve on an already bound listener. `config.listen` is ignored.
    pub fn from_listener(listener: TcpListener, config: RelayConfig, cipher: Arc<C>) -> Self {
        Self {
            listener,
            ctx: Arc::new(RelayContext::new(cipher, config)),
        }
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// The live session registry.
    pub fn registry(&self) -> Arc<SessionRegistry<C::PublicKey>> {
        Arc::clone(&self.ctx.registry)
    }

    /// Accept forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept until `shutdown` resolves, then stop every session.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            addr = ?self.listener.local_addr().ok(),
            fingerprint = %fingerprint(self.ctx.cipher.local_public_key()),
            "relay listening"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.accept(stream, peer_addr),
                    Err(e) => {
                        warn!(error = %RelayError::Accept(e), "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!(sessions = self.ctx.registry.len(), "relay shutting down");
        self.ctx.registry.stop_all();
    }

    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let registry = &self.ctx.registry;
        if registry.len() >= self.ctx.config.max_sessions {
            warn!(peer = %peer_addr, max = self.ctx.config.max_sessions, "session limit reached, connection refused");
            return;
        }

        let id = registry.next_id();
        let (tx, rx) = mpsc::channel(self.ctx.config.queue_depth);
        let handle = Arc::new(SessionHandle::new(id, peer_addr, tx));
        registry.add(Arc::clone(&handle));
        info!(session = id, peer = %peer_addr, "accepted connection");

        let span = info_span!("session", id, peer = %peer_addr);
        tokio::spawn(run_session(stream, handle, rx, Arc::clone(&self.ctx)).instrument(span));
    }
}
