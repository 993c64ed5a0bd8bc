//! Event - the unit of work routed by the dispatcher
//!
//! The dispatcher only ever reads `Event::stage`. The message is opaque.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque event payload.
///
/// Cloning is cheap: the value is shared behind an `Arc`.
/// Handlers recover the concrete type with [`Message::downcast_ref`].
#[derive(Clone)]
pub struct Message {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Message {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Type name of the wrapped value (diagnostics only)
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the payload as text when it is a `String` or `&'static str`
    pub fn as_text(&self) -> Option<&str> {
        if let Some(s) = self.downcast_ref::<String>() {
            return Some(s.as_str());
        }
        self.downcast_ref::<&'static str>().copied()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.debug_tuple("Message").field(&text).finish(),
            None => write!(f, "Message<{}>", self.type_name),
        }
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::new(value)
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::new(value.to_string())
    }
}

/// A message addressed to a stage
#[derive(Debug, Clone)]
pub struct Event {
    /// Destination stage id
    pub stage: String,
    /// Payload, never interpreted by the dispatcher
    pub message: Message,
}

impl Event {
    pub fn new(stage: impl Into<String>, message: impl Into<Message>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Order {
        id: u32,
    }

    #[test]
    fn test_message_downcast() {
        let msg = Message::new(Order { id: 7 });
        assert!(msg.is::<Order>());
        assert_eq!(msg.downcast_ref::<Order>(), Some(&Order { id: 7 }));
        assert!(msg.downcast_ref::<String>().is_none());
        assert!(msg.as_text().is_none());
    }

    #[test]
    fn test_text_message() {
        let event = Event::new("parse", "hello");
        assert_eq!(event.stage(), "parse");
        assert_eq!(event.message().as_text(), Some("hello"));
        assert_eq!(format!("{:?}", event.message()), "Message(\"hello\")");
    }

    #[test]
    fn test_clone_shares_payload() {
        let event = Event::new("a", Message::new(vec![1u8, 2, 3]));
        let copy = event.clone();
        assert_eq!(copy.message.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
    }
}
