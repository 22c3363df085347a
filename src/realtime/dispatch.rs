//! Handler registry keyed by event kind

use super::{parse_frame, ChannelEvent, EventKind};
use std::collections::HashMap;
use std::sync::Arc;

pub type Handler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// At most one handler per [`EventKind`].
///
/// Registering a kind twice replaces the earlier handler, so re-running the
/// connect handshake never causes an event to be processed twice.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when an existing handler was replaced
    pub fn register<F>(&mut self, kind: EventKind, handler: F) -> bool
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler)).is_some()
    }

    pub fn unregister(&mut self, kind: EventKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Hand the event to its handler. Returns false when none is registered.
    pub fn dispatch(&self, event: ChannelEvent) -> bool {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => {
                handler(event);
                true
            }
            None => {
                tracing::debug!(event = %kind, "No handler registered");
                false
            }
        }
    }

    /// Parse one text frame and dispatch it. Bad frames are logged and dropped.
    pub fn dispatch_frame(&self, text: &str) -> bool {
        match parse_frame(text) {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed channel frame");
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(dispatcher: &mut Dispatcher, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        dispatcher.register(kind, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_reregistration_replaces_handler() {
        let mut dispatcher = Dispatcher::new();
        let first = counter(&mut dispatcher, EventKind::MessageRead);
        let second = counter(&mut dispatcher, EventKind::MessageRead);
        assert_eq!(dispatcher.handler_count(), 1);

        dispatcher.dispatch(ChannelEvent::MessageRead {
            message_id: "m1".into(),
        });
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_reports_replacement() {
        let mut dispatcher = Dispatcher::new();
        assert!(!dispatcher.register(EventKind::UserTyping, |_| {}));
        assert!(dispatcher.register(EventKind::UserTyping, |_| {}));
        assert!(dispatcher.unregister(EventKind::UserTyping));
        assert!(!dispatcher.unregister(EventKind::UserTyping));
    }

    #[test]
    fn test_dispatch_frame_drops_bad_input() {
        let mut dispatcher = Dispatcher::new();
        let delivered = counter(&mut dispatcher, EventKind::MessageDelivered);

        assert!(!dispatcher.dispatch_frame("{broken"));
        assert!(!dispatcher.dispatch_frame(r#"{"event":"message_delivered","data":{}}"#));
        assert!(!dispatcher.dispatch_frame(r#"{"event":"mystery","data":{}}"#));
        assert!(dispatcher.dispatch_frame(r#"{"event":"message_delivered","data":{"message_id":"m1"}}"#));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.dispatch(ChannelEvent::OnlineUsers { users: vec![] }));
    }
}
