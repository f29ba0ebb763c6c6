//! Event listener registry with iteration-safe mutation.
//!
//! Handlers fire in insertion order. The registry is built for a
//! single-threaded core, so handlers are plain `FnMut` closures and may
//! add or remove listeners from inside a dispatch:
//!
//! - a handler added during a dispatch is not invoked until the next one
//! - a handler removed during a dispatch is skipped if not yet visited;
//!   removing an already-visited handler adjusts the cursor so no survivor
//!   is skipped or run twice
//!
//! A handler for `connected` registered while the session is already open
//! is invoked immediately with a synthetic event (and symmetrically for
//! `disconnected`), so late subscribers observe a coherent lifecycle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

/// Events recognized by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A complete inbound object was reassembled and parsed.
    Message,
    /// The session opened.
    Connected,
    /// The session closed.
    Disconnected,
    /// An outbound object was abandoned, or the handshake failed fatally.
    Error,
}

impl EventKind {
    /// Map an event name to its kind; `None` means the name belongs to the
    /// lower transport and must be forwarded unchanged.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "message" => Some(EventKind::Message),
            "connected" => Some(EventKind::Connected),
            "disconnected" => Some(EventKind::Disconnected),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    /// The event's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
        }
    }
}

/// An event delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A complete inbound object.
    Message {
        /// The parsed JSON value.
        data: Value,
    },
    /// The session opened.
    Connected,
    /// The session closed.
    Disconnected,
    /// Something went irrecoverably wrong with an outbound object or the
    /// handshake.
    Error {
        /// Snapshot of the object that failed (`null` for handshake errors).
        data: Value,
        /// Human-readable reason.
        reason: String,
    },
    /// A lower-transport event forwarded through the listener passthrough.
    Native {
        /// The lower transport's event name.
        name: String,
        /// The lower transport's event payload.
        detail: Value,
    },
}

impl TransportEvent {
    /// The registry list this event dispatches to; `None` for native events,
    /// which never pass through the registry.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            TransportEvent::Message { .. } => Some(EventKind::Message),
            TransportEvent::Connected => Some(EventKind::Connected),
            TransportEvent::Disconnected => Some(EventKind::Disconnected),
            TransportEvent::Error { .. } => Some(EventKind::Error),
            TransportEvent::Native { .. } => None,
        }
    }
}

/// Identifies a registered listener for removal.
pub type ListenerId = u64;

type Callback = Rc<RefCell<dyn FnMut(&TransportEvent)>>;

#[derive(Default)]
struct ListenerList {
    entries: Vec<(ListenerId, Callback)>,
    /// Index of the next entry to visit while a dispatch is running.
    cursor: usize,
    dispatching: bool,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<EventKind, ListenerList>,
    next_id: ListenerId,
    connected: bool,
}

/// Shared handle to the listener registry.
///
/// Cloning is cheap; all clones refer to the same registry, which is what
/// lets handlers mutate it from inside a dispatch.
#[derive(Clone, Default)]
pub struct Events {
    inner: Rc<RefCell<Inner>>,
}

impl Events {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`. Returns the id used by [`Events::off`].
    ///
    /// Late-subscriber coherence: a `connected` handler registered while the
    /// session is open (or a `disconnected` handler while it is not) is
    /// invoked immediately with a synthetic event.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl FnMut(&TransportEvent) + 'static,
    ) -> ListenerId {
        let callback: Callback = Rc::new(RefCell::new(handler));
        let (id, synthetic) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            let connected = inner.connected;
            inner
                .lists
                .entry(kind)
                .or_default()
                .entries
                .push((id, callback.clone()));
            let synthetic = match kind {
                EventKind::Connected if connected => Some(TransportEvent::Connected),
                EventKind::Disconnected if !connected => Some(TransportEvent::Disconnected),
                _ => None,
            };
            (id, synthetic)
        };
        if let Some(event) = synthetic {
            (&mut *callback.borrow_mut())(&event);
        }
        id
    }

    /// Remove a handler. Returns whether it was registered.
    ///
    /// Safe to call from inside a dispatch; the iteration cursor is adjusted
    /// so remaining handlers are neither skipped nor run twice.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(list) = inner.lists.get_mut(&kind) else {
            return false;
        };
        let Some(index) = list.entries.iter().position(|(entry_id, _)| *entry_id == id) else {
            return false;
        };
        list.entries.remove(index);
        if list.dispatching && index < list.cursor {
            list.cursor = list.cursor.saturating_sub(1);
        }
        true
    }

    /// Drop all handlers and reset iteration state.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        for list in inner.lists.values_mut() {
            list.entries.clear();
            list.cursor = 0;
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .borrow()
            .lists
            .get(&kind)
            .map_or(0, |list| list.entries.len())
    }

    /// Record the session lifecycle for late-subscriber coherence.
    pub(crate) fn set_connected(&self, connected: bool) {
        self.inner.borrow_mut().connected = connected;
    }

    /// Invoke every handler registered for the event's kind, in insertion
    /// order, tolerating mutation from inside the handlers.
    pub(crate) fn dispatch(&self, event: &TransportEvent) {
        let Some(kind) = event.kind() else {
            return;
        };
        // Handlers registered during this dispatch have ids at or above the
        // barrier and are skipped until the next dispatch.
        let barrier = {
            let mut inner = self.inner.borrow_mut();
            let barrier = inner.next_id;
            let list = inner.lists.entry(kind).or_default();
            list.cursor = 0;
            list.dispatching = true;
            barrier
        };

        loop {
            // The registry borrow is released before the handler runs so the
            // handler may re-enter on/off/clear.
            let callback = {
                let mut inner = self.inner.borrow_mut();
                let Some(list) = inner.lists.get_mut(&kind) else {
                    break;
                };
                let mut next = None;
                while list.cursor < list.entries.len() {
                    let (id, callback) = &list.entries[list.cursor];
                    list.cursor += 1;
                    if *id >= barrier {
                        continue;
                    }
                    next = Some(callback.clone());
                    break;
                }
                next
            };
            match callback {
                Some(callback) => (&mut *callback.borrow_mut())(event),
                None => break,
            }
        }

        let mut inner = self.inner.borrow_mut();
        if let Some(list) = inner.lists.get_mut(&kind) {
            list.dispatching = false;
            list.cursor = 0;
        }
    }
}
