use crate::error::Result;
use crate::message::{Message, ReceiverId};

use std::sync::Arc;
use std::thread::ThreadId;

/// Invocation bound to a `(kind, receiver)` pair.
///
/// Handlers are shared so the dispatching thread can run them with the
/// registry lock released; a handler may register or unregister
/// bindings from inside its own invocation.
pub type Handler = Arc<dyn Fn(&Arc<Message>) + Send + Sync>;

/// The post-message-and-dispatch contract implemented by event loops.
///
/// A dispatcher owns exactly one delivery thread. Messages may be
/// posted from any thread and are delivered on that thread, FIFO per
/// producer. Handler bindings are keyed by `(kind, receiver)`;
/// multiple receivers may bind the same kind.
pub trait EventDispatcher: Send + Sync {
    /// Enqueues a message for delivery on the owning thread.
    ///
    /// Posting to a dispatcher whose loop has shut down fails with
    /// [`Error::AlreadyShutDown`](crate::Error::AlreadyShutDown).
    fn post_message(&self, message: Arc<Message>) -> Result<()>;

    /// Binds `(kind, receiver)` to an invocation.
    ///
    /// The binding is visible to every message dispatched after this
    /// call returns.
    fn register_handler(&self, kind: u32, receiver: ReceiverId, handler: Handler);

    /// Removes the `(kind, receiver)` binding, if present.
    fn unregister_handler(&self, kind: u32, receiver: ReceiverId);

    /// Removes every binding for `receiver`.
    fn unregister_receiver(&self, receiver: ReceiverId);

    /// Returns the delivery thread, for identity comparison only.
    fn owner_thread(&self) -> ThreadId;
}

/// Per-dispatcher mapping from `(kind, receiver)` to invocations.
///
/// Bindings keep registration order; dispatch walks them in that
/// order. The table itself is not synchronized, its owner guards it
/// with a mutex.
pub(crate) struct HandlerTable {
    bindings: Vec<HandlerBinding>,
}

struct HandlerBinding {
    kind: u32,
    receiver: ReceiverId,
    handler: Handler,
}

impl HandlerTable {
    pub(crate) fn new() -> HandlerTable {
        HandlerTable {
            bindings: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, kind: u32, receiver: ReceiverId, handler: Handler) {
        self.bindings.push(HandlerBinding {
            kind,
            receiver,
            handler,
        });
    }

    pub(crate) fn unregister(&mut self, kind: u32, receiver: ReceiverId) {
        self.bindings
            .retain(|b| !(b.kind == kind && b.receiver == receiver));
    }

    pub(crate) fn unregister_receiver(&mut self, receiver: ReceiverId) {
        self.bindings.retain(|b| b.receiver != receiver);
    }

    /// Returns the invocations for `message`, in registration order.
    ///
    /// A directed message selects only bindings for its target; an
    /// undirected one selects every binding for its kind.
    pub(crate) fn matching(&self, message: &Message) -> Vec<Handler> {
        self.bindings
            .iter()
            .filter(|b| b.kind == message.kind())
            .filter(|b| message.target().is_none_or(|t| b.receiver == t))
            .map(|b| Arc::clone(&b.handler))
            .collect()
    }
}
