use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Reserved kind value.
///
/// No message may carry this kind. Removal filters treat it as a
/// wildcard that matches any kind.
pub const INVALID_KIND: u32 = u32::MAX;

/// Identity token for a message receiver.
///
/// A `ReceiverId` is an opaque pointer-width value used only for
/// equality comparison when binding handlers and when removing armed
/// timer nodes. It is never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(usize);

impl ReceiverId {
    /// Wraps a caller-chosen raw identity.
    pub fn new(raw: usize) -> ReceiverId {
        ReceiverId(raw)
    }

    /// Derives an identity from the address of a shared object.
    pub fn of<T: ?Sized>(target: &Arc<T>) -> ReceiverId {
        ReceiverId(Arc::as_ptr(target).cast::<()>() as usize)
    }
}

/// An immutable message delivered through an [`EventDispatcher`].
///
/// A message carries a numeric kind, an optional delivery target and
/// an optional payload. Messages are shared between the producer, the
/// pending queue and any timer nodes holding them; each retention is
/// one `Arc` clone, released on dispatch or removal.
///
/// [`EventDispatcher`]: crate::EventDispatcher
pub struct Message {
    /// Numeric kind used to select handler bindings.
    kind: u32,

    /// Delivery target for directed messages.
    ///
    /// An undirected message reaches every handler bound to its kind;
    /// a directed one reaches only bindings for this receiver.
    target: Option<ReceiverId>,

    /// User-defined payload, opaque to the dispatch machinery.
    payload: Option<Box<dyn Any + Send + Sync>>,
}

impl Message {
    /// Creates an undirected message with no payload.
    pub fn new(kind: u32) -> Arc<Message> {
        Arc::new(Message {
            kind,
            target: None,
            payload: None,
        })
    }

    /// Creates an undirected message carrying `payload`.
    pub fn with_payload<P: Any + Send + Sync>(kind: u32, payload: P) -> Arc<Message> {
        Arc::new(Message {
            kind,
            target: None,
            payload: Some(Box::new(payload)),
        })
    }

    /// Creates a message directed at a single receiver.
    pub fn directed(kind: u32, target: ReceiverId) -> Arc<Message> {
        Arc::new(Message {
            kind,
            target: Some(target),
            payload: None,
        })
    }

    /// Creates a directed message carrying `payload`.
    pub fn directed_with_payload<P: Any + Send + Sync>(
        kind: u32,
        target: ReceiverId,
        payload: P,
    ) -> Arc<Message> {
        Arc::new(Message {
            kind,
            target: Some(target),
            payload: Some(Box::new(payload)),
        })
    }

    /// Returns the message kind.
    pub fn kind(&self) -> u32 {
        self.kind
    }

    /// Returns the delivery target, if the message is directed.
    pub fn target(&self) -> Option<ReceiverId> {
        self.target
    }

    /// Returns the payload downcast to `P`, if present and of that type.
    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_downcast() {
        let msg = Message::with_payload(3, String::from("hello"));
        assert_eq!(msg.kind(), 3);
        assert_eq!(msg.payload::<String>().map(String::as_str), Some("hello"));
        assert!(msg.payload::<u64>().is_none());
    }

    #[test]
    fn plain_message_has_no_target() {
        let msg = Message::new(1);
        assert!(msg.target().is_none());
        assert!(msg.payload::<()>().is_none());
    }

    #[test]
    fn receiver_identity_follows_the_allocation() {
        let a: Arc<str> = Arc::from("x");
        let b: Arc<str> = Arc::from("x");

        assert_eq!(ReceiverId::of(&a), ReceiverId::of(&Arc::clone(&a)));
        assert_ne!(ReceiverId::of(&a), ReceiverId::of(&b));

        let msg = Message::directed(9, ReceiverId::of(&a));
        assert_eq!(msg.target(), Some(ReceiverId::of(&a)));
    }
}
