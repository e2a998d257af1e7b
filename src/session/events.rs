//! Session listener registry
//!
//! Listeners are registered per event kind and run in registration order
//! when the session emits that kind.

use std::collections::HashMap;

/// Lifecycle notifications emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login accepted; commands now flow
    Ready,
    /// Command connection closed
    Closed,
    /// A connection-fatal error ended the session
    Error(String),
}

/// Registry key for [`SessionEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Closed,
    Error,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Ready => EventKind::Ready,
            SessionEvent::Closed => EventKind::Closed,
            SessionEvent::Error(_) => EventKind::Error,
        }
    }
}

pub type Listener = Box<dyn FnMut(&SessionEvent) + Send>;

#[derive(Default)]
pub struct Listeners {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for one event kind
    pub fn on(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.entry(kind).or_default().push(listener);
    }

    /// Run every listener of the event's kind; returns how many ran
    pub fn emit(&mut self, event: &SessionEvent) -> usize {
        match self.listeners.get_mut(&event.kind()) {
            Some(listeners) => {
                for listener in listeners.iter_mut() {
                    listener(event);
                }
                listeners.len()
            }
            None => 0,
        }
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }
}
