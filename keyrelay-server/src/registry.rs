//! Live session registry.
//!
//! Mutated from the accept loop (insert) and from every session's teardown
//! (remove), iterated on every broadcast. Backed by a sharded concurrent map.
//!
//! # Iteration Guarantees
//!
//! [`SessionRegistry::for_each`] walks a snapshot taken when it is called:
//!
//! - concurrent `add`/`remove` never blocks on or panics the iteration
//! - a session present for the whole iteration is always visited
//! - a session removed before its turn is skipped, because removal marks the
//!   handle closed and closed handles are never visited

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

/// Unique per relay process, assigned on accept.
pub type SessionId = u64;

/// Why a line could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Session is closing or gone.
    #[error("session closed")]
    Closed,
    /// Outbound queue is full; the peer is not reading fast enough.
    #[error("outbound queue full")]
    QueueFull,
}

/// Shared view of one relay session.
///
/// The handler task owns the socket; everyone else goes through this handle
/// to queue outbound lines or ask the session to stop.
pub struct SessionHandle<K> {
    id: SessionId,
    peer_addr: SocketAddr,
    remote_key: OnceLock<K>,
    outbound: mpsc::Sender<String>,
    stop: Notify,
    closed: AtomicBool,
}

impl<K> SessionHandle<K> {
    /// Create a handle whose outbound lines go to `outbound`.
    pub fn new(id: SessionId, peer_addr: SocketAddr, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id,
            peer_addr,
            remote_key: OnceLock::new(),
            outbound,
            stop: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Peer key, once the handshake has completed.
    pub fn remote_key(&self) -> Option<&K> {
        self.remote_key.get()
    }

    /// Publish the peer key. Only the first call has any effect.
    pub fn set_remote_key(&self, key: K) -> bool {
        self.remote_key.set(key).is_ok()
    }

    /// Queue one line for this session without waiting.
    pub fn deliver(&self, line: String) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the handler task to close the session.
    ///
    /// Stores a permit, so a stop issued before the handler starts waiting is
    /// not lost.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.stop.notified().await;
    }

    /// Whether the session has started tearing down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed. Returns `true` only for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl<K> std::fmt::Debug for SessionHandle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("keyed", &self.remote_key.get().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Concurrency-safe set of live sessions, keyed by id.
pub struct SessionRegistry<K> {
    sessions: DashMap<SessionId, Arc<SessionHandle<K>>>,
    next_id: AtomicU64,
}

impl<K> SessionRegistry<K> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh session id.
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a session. Replaces nothing: ids are never reused.
    pub fn add(&self, handle: Arc<SessionHandle<K>>) {
        self.sessions.insert(handle.id(), handle);
    }

    /// Deregister a session and mark it closed.
    ///
    /// Idempotent. Returns whether something was actually removed.
    pub fn remove(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, handle)) => {
                handle.mark_closed();
                true
            }
            None => false,
        }
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered, not-yet-closed sessions, ordered by id.
    ///
    /// Shard locks are held only while copying out `Arc`s, never while the
    /// caller works with the result.
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle<K>>> {
        let mut handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| !handle.is_closed())
            .collect();
        handles.sort_by_key(|handle| handle.id());
        handles
    }

    /// Visit every live session. See the module docs for guarantees.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&SessionHandle<K>),
    {
        for handle in self.snapshot() {
            if handle.is_closed() {
                continue;
            }
            visitor(&handle);
        }
    }

    /// Ask every registered session to stop.
    pub fn stop_all(&self) {
        self.for_each(|handle| handle.stop());
    }
}

impl<K> Default for SessionRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    fn handle(
        registry: &SessionRegistry<String>,
    ) -> (Arc<SessionHandle<String>>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(SessionHandle::new(registry.next_id(), addr(), tx)), rx)
    }

    #[test]
    fn test_add_and_remove() {
        let registry = SessionRegistry::<String>::new();
        let (a, _rx) = handle(&registry);
        registry.add(Arc::clone(&a));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(a.id()));
        assert!(a.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::<String>::new();
        let (a, _rx) = handle(&registry);
        registry.add(Arc::clone(&a));

        assert!(registry.remove(a.id()));
        assert!(!registry.remove(a.id()));
        assert!(!registry.remove(9999));
    }

    #[test]
    fn test_ids_are_unique() {
        let registry: SessionRegistry<String> = SessionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_for_each_skips_removed() {
        let registry = SessionRegistry::<String>::new();
        let (a, _ra) = handle(&registry);
        let (b, _rb) = handle(&registry);
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));

        let mut seen = Vec::new();
        registry.for_each(|h| {
            seen.push(h.id());
            // Removing a later session mid-iteration hides it from this pass.
            registry.remove(b.id());
        });
        assert_eq!(seen, vec![a.id()]);
    }

    #[test]
    fn test_deliver_and_errors() {
        let registry = SessionRegistry::<String>::new();
        let (tx, mut rx) = mpsc::channel(1);
        let h = SessionHandle::<String>::new(registry.next_id(), addr(), tx);

        assert_eq!(h.deliver("one".into()), Ok(()));
        assert_eq!(h.deliver("two".into()), Err(DeliveryError::QueueFull));
        assert_eq!(rx.try_recv().unwrap(), "one");

        drop(rx);
        assert_eq!(h.deliver("three".into()), Err(DeliveryError::Closed));
    }

    #[test]
    fn test_deliver_after_close_refused() {
        let registry = SessionRegistry::<String>::new();
        let (a, mut rx) = handle(&registry);
        assert!(a.mark_closed());
        assert!(!a.mark_closed());
        assert_eq!(a.deliver("late".into()), Err(DeliveryError::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remote_key_set_once() {
        let registry = SessionRegistry::<String>::new();
        let (a, _rx) = handle(&registry);
        assert!(a.remote_key().is_none());
        assert!(a.set_remote_key("first".into()));
        assert!(!a.set_remote_key("second".into()));
        assert_eq!(a.remote_key().map(String::as_str), Some("first"));
    }

    #[test]
    fn test_iteration_concurrent_with_mutation() {
        let registry = Arc::new(SessionRegistry::<String>::new());
        let (stable, _rx) = handle(&registry);
        registry.add(Arc::clone(&stable));

        let churn = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let (tx, _rx) = mpsc::channel(1);
                    let h = Arc::new(SessionHandle::new(registry.next_id(), addr(), tx));
                    let id = h.id();
                    registry.add(h);
                    assert!(registry.remove(id));
                }
            })
        };

        for _ in 0..2_000 {
            let mut saw_stable = false;
            registry.for_each(|h| {
                if h.id() == stable.id() {
                    saw_stable = true;
                }
            });
            assert!(saw_stable);
        }

        churn.join().unwrap();
        assert_eq!(registry.len(), 1);
    }
}
