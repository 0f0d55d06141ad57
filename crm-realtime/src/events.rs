//! Typed publish/subscribe for engine events.
//!
//! Every event belongs to one [`EventKind`]; subscribers register per kind and
//! are called synchronously in registration order. The subscriber list is
//! copied before dispatch, so callbacks can subscribe, unsubscribe or call
//! back into the engine. A panicking callback is logged and skipped.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::collab::SessionEvent;
use crate::error::EngineError;
use crate::presence::PresenceRecord;
use crate::protocol::Frame;
use crate::queue::QueuedMessage;

/// The closed set of event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    Message,
    PresenceUpdate,
    CollaborationEvent,
    Participant,
    Notification,
    DataUpdate,
    SystemMessage,
    SyncSuccess,
    SyncFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Error,
        EventKind::Message,
        EventKind::PresenceUpdate,
        EventKind::CollaborationEvent,
        EventKind::Participant,
        EventKind::Notification,
        EventKind::DataUpdate,
        EventKind::SystemMessage,
        EventKind::SyncSuccess,
        EventKind::SyncFailed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnecting => "reconnecting",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::PresenceUpdate => "presence_update",
            EventKind::CollaborationEvent => "collaboration_event",
            EventKind::Participant => "participant",
            EventKind::Notification => "notification",
            EventKind::DataUpdate => "data_update",
            EventKind::SystemMessage => "system_message",
            EventKind::SyncSuccess => "sync-success",
            EventKind::SyncFailed => "sync-failed",
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Transport opened
    Connected { connection_id: String },
    /// Transport closed; `clean` closes are not retried
    Disconnected { code: Option<u16>, clean: bool },
    /// A reconnect attempt is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    Error(EngineError),
    /// Frame of a type the router has no handler for
    Message(Frame),
    PresenceUpdate(PresenceRecord),
    CollaborationEvent {
        session_id: String,
        event: SessionEvent,
    },
    /// A remote participant joined or left a session
    Participant {
        session_id: String,
        user_id: String,
        joined: bool,
    },
    Notification(Frame),
    DataUpdate(Frame),
    SystemMessage(Frame),
    SyncSuccess { item: QueuedMessage },
    SyncFailed {
        item: QueuedMessage,
        error: EngineError,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Connected { .. } => EventKind::Connected,
            EngineEvent::Disconnected { .. } => EventKind::Disconnected,
            EngineEvent::Reconnecting { .. } => EventKind::Reconnecting,
            EngineEvent::Error(_) => EventKind::Error,
            EngineEvent::Message(_) => EventKind::Message,
            EngineEvent::PresenceUpdate(_) => EventKind::PresenceUpdate,
            EngineEvent::CollaborationEvent { .. } => EventKind::CollaborationEvent,
            EngineEvent::Participant { .. } => EventKind::Participant,
            EngineEvent::Notification(_) => EventKind::Notification,
            EngineEvent::DataUpdate(_) => EventKind::DataUpdate,
            EngineEvent::SystemMessage(_) => EventKind::SystemMessage,
            EngineEvent::SyncSuccess { .. } => EventKind::SyncSuccess,
            EngineEvent::SyncFailed { .. } => EventKind::SyncFailed,
        }
    }
}

type Callback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventKind, Vec<(u64, Callback)>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared subscriber registry. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Call every subscriber of the event's kind. Returns how many callbacks
    /// panicked.
    pub fn dispatch(&self, event: &EngineEvent) -> usize {
        let kind = event.kind();
        let callbacks: Vec<Callback> = match lock(&self.registry).subscribers.get(&kind) {
            Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        let mut panicked = 0;
        for callback in callbacks {
            if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                panicked += 1;
                log::error!(
                    "Subscriber for '{}' panicked: {}",
                    kind.name(),
                    panic_message(cause.as_ref())
                );
            }
        }
        panicked
    }

    pub fn dispatch_all(&self, events: Vec<EngineEvent>) {
        for event in &events {
            self.dispatch(event);
        }
    }

    /// Total number of live subscriptions across all kinds.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.values().map(Vec::len).sum()
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the callback. Returns `false` if the bus is gone or the
    /// callback was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let Some(list) = registry.subscribers.get_mut(&self.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.subscribers.remove(&self.kind);
        }
        removed
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
