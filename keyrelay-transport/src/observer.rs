//! Where received messages go.
//!
//! The receive task never knows about terminals or UIs. It hands each
//! decrypted [`Message`] to a [`MessageObserver`].

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::Message;

/// Receives decrypted messages from a [`PeerClient`](crate::PeerClient).
///
/// Called from the client's receive task, so implementations must not block.
pub trait MessageObserver: Send + Sync + 'static {
    /// A message arrived.
    fn on_message(&self, message: Message);

    /// The relay closed the connection or the read failed. Called at most
    /// once, and not at all when the client is closed locally.
    fn on_closed(&self) {}
}

/// Forwards into a channel. A dropped receiver discards messages.
///
/// The receive task owns the sender, so the receiver sees `None` once the
/// client has stopped receiving.
impl MessageObserver for mpsc::UnboundedSender<Message> {
    fn on_message(&self, message: Message) {
        let _ = self.send(message);
    }
}

impl<T: MessageObserver + ?Sized> MessageObserver for Arc<T> {
    fn on_message(&self, message: Message) {
        (**self).on_message(message)
    }

    fn on_closed(&self) {
        (**self).on_closed()
    }
}

/// Observer built from a closure. See [`observer_fn`].
pub struct FnObserver<F>(F);

impl<F> MessageObserver for FnObserver<F>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    fn on_message(&self, message: Message) {
        (self.0)(message)
    }
}

/// Wrap a closure as a [`MessageObserver`].
pub fn observer_fn<F>(f: F) -> FnObserver<F>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    FnObserver(f)
}
