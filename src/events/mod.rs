//! Event surface for application code
//!
//! The engine reports protocol activity exclusively through an [`Emitter`]:
//! register a listener for an [`EventKind`] and it is called synchronously
//! whenever the engine emits a matching [`SpotEvent`]. Listeners are
//! addressed by the [`ListenerId`] returned at registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::protocol::{AlivePayload, ByePayload, DataPayload, Identity};

/// The event types the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A host advertised itself.
    Alive,
    /// A host announced departure.
    Bye,
    /// A search response arrived.
    Found,
    /// A data message arrived on the data socket.
    Data,
}

/// An event together with its payload.
#[derive(Debug, Clone)]
pub enum SpotEvent {
    Alive(AlivePayload),
    Bye(ByePayload),
    Found(Identity),
    Data(DataPayload),
}

impl SpotEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SpotEvent::Alive(_) => EventKind::Alive,
            SpotEvent::Bye(_) => EventKind::Bye,
            SpotEvent::Found(_) => EventKind::Found,
            SpotEvent::Data(_) => EventKind::Data,
        }
    }
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&SpotEvent) + Send + Sync>;

struct Entry {
    id: ListenerId,
    once: bool,
    callback: Callback,
}

/// Listener registry.
///
/// `emit` snapshots the listener list before invoking, so a listener
/// removed mid-emit still sees the event of the round it was registered
/// for, and listeners may register or remove others from inside a
/// callback without deadlocking.
#[derive(Default)]
pub struct Emitter {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<Entry>>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for an event type.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&SpotEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add(kind, Arc::new(listener), false)
    }

    /// Add a listener that is removed after its first invocation.
    pub fn once(
        &self,
        kind: EventKind,
        listener: impl Fn(&SpotEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add(kind, Arc::new(listener), true)
    }

    fn add(&self, kind: EventKind, callback: Callback, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(kind)
            .or_default()
            .push(Entry { id, once, callback });
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&self, kind: EventKind, id: ListenerId) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = listeners.get_mut(&kind) {
            entries.retain(|entry| entry.id != id);
        }
    }

    /// Whether a listener is still registered for an event type.
    pub fn has_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .get(&kind)
            .map(|entries| entries.iter().any(|entry| entry.id == id))
            .unwrap_or(false)
    }

    /// Remove every listener for every event type.
    pub fn clear(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.clear();
    }

    /// Fire an event to every listener registered for its kind.
    pub fn emit(&self, event: &SpotEvent) {
        let callbacks: Vec<Callback> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            match listeners.get_mut(&event.kind()) {
                Some(entries) => {
                    let snapshot = entries.iter().map(|e| e.callback.clone()).collect();
                    entries.retain(|entry| !entry.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };
        for callback in callbacks {
            callback(event);
        }
    }
}
