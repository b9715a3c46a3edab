//! Change notifications emitted by replicated maps.
//!
//! Backends distinguish two sources of change. Local transactions only ever produce a
//! [`MapEvent::LocalAfterTransaction`] notification once the outermost transaction
//! closes. Changes that arrive from another participant produce per-key
//! `RemoteInsert`/`RemoteUpdate`/`RemoteDelete` events followed by one
//! `RemoteAfterTransaction`.
//!
//! Handlers are invoked after the backend released its internal locks, so a handler may
//! freely read from the map it is subscribed to.

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use super::Value;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// The kinds of events a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEventKind {
    RemoteInsert,
    RemoteUpdate,
    RemoteDelete,
    RemoteAfterTransaction,
    LocalAfterTransaction,
}

/// A change notification delivered to map event handlers.
#[derive(Debug, Clone)]
pub enum MapEvent {
    /// A remote participant added `key`
    RemoteInsert { key: String, value: Value },
    /// A remote participant replaced the value at `key`
    RemoteUpdate { key: String, value: Value },
    /// A remote participant deleted `key`
    RemoteDelete { key: String },
    /// A remote transaction finished applying
    RemoteAfterTransaction,
    /// A local transaction touching this map committed
    LocalAfterTransaction,
}

impl MapEvent {
    /// Returns the kind used for subscription matching
    pub fn kind(&self) -> MapEventKind {
        match self {
            MapEvent::RemoteInsert { .. } => MapEventKind::RemoteInsert,
            MapEvent::RemoteUpdate { .. } => MapEventKind::RemoteUpdate,
            MapEvent::RemoteDelete { .. } => MapEventKind::RemoteDelete,
            MapEvent::RemoteAfterTransaction => MapEventKind::RemoteAfterTransaction,
            MapEvent::LocalAfterTransaction => MapEventKind::LocalAfterTransaction,
        }
    }

    /// Returns the affected key for per-key events
    pub fn key(&self) -> Option<&str> {
        match self {
            MapEvent::RemoteInsert { key, .. }
            | MapEvent::RemoteUpdate { key, .. }
            | MapEvent::RemoteDelete { key } => Some(key),
            _ => None,
        }
    }

    /// Returns the new value for insert and update events
    pub fn value(&self) -> Option<&Value> {
        match self {
            MapEvent::RemoteInsert { value, .. } | MapEvent::RemoteUpdate { value, .. } => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Check if this event originated from another participant
    pub fn is_remote(&self) -> bool {
        !matches!(self, MapEvent::LocalAfterTransaction)
    }
}

/// Callback invoked for map events.
pub type MapEventHandler = Arc<dyn Fn(&MapEvent) + Send + Sync>;

/// Type alias for a registered handler together with its filter
type HandlerEntry = (SubscriptionId, MapEventKind, MapEventHandler);

/// Registry of event handlers for one map.
#[derive(Default)]
pub struct EventHandlers {
    handlers: Mutex<Vec<HandlerEntry>>,
}

impl EventHandlers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe(&self, kind: MapEventKind, handler: MapEventHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.lock().unwrap().push((id, kind, handler));
        id
    }

    /// Remove a handler. Returns false if it was not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(existing, _, _)| *existing != id);
        handlers.len() != before
    }

    /// Check if any handler is registered
    pub fn has_handlers(&self) -> bool {
        !self.handlers.lock().unwrap().is_empty()
    }

    /// Deliver `event` to every handler subscribed to its kind.
    ///
    /// Matching handlers are collected first so no lock is held while they run; a
    /// handler may subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: &MapEvent) {
        let kind = event.kind();
        let matching: Vec<MapEventHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();

        for handler in matching {
            handler(event);
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field(
                "handlers",
                &format!("<{} handlers>", self.handlers.lock().unwrap().len()),
            )
            .finish()
    }
}
