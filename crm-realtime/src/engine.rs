//! Public engine handle.
//!
//! `RealtimeEngine` is a cheap, cloneable handle around shared state. All
//! operations are synchronous: they lock the state, make their change, and
//! dispatch the resulting events once the lock is released. The socket itself
//! is driven by a tokio task spawned from `connect()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::collab::CollaborationSession;
use crate::config::{ConnectOptions, EngineConfig, SendOptions};
use crate::connection::{supervise, ConnectionState};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus, EventKind, Subscription};
use crate::metrics::MetricsSnapshot;
use crate::presence::PresenceRecord;
use crate::protocol::FrameKind;
use crate::queue::QueuedMessage;
use crate::state::EngineState;
use crate::store::OfflineStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between engine handles and the socket task.
pub(crate) struct Shared {
    state: Mutex<EngineState>,
    bus: EventBus,
    /// Stop signal for the running socket task, if any
    control: Mutex<Option<watch::Sender<bool>>>,
}

impl Shared {
    /// Run `f` under the state lock, then dispatch whatever it emitted.
    pub(crate) fn apply<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, events) = {
            let mut state = lock(&self.state);
            let result = f(&mut *state);
            (result, state.take_events())
        };
        self.bus.dispatch_all(events);
        result
    }

    fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&*lock(&self.state))
    }
}

/// Handle to a real-time engine.
///
/// ```no_run
/// # async fn demo() {
/// use crm_realtime::{EngineConfig, EventKind, RealtimeEngine};
///
/// let engine = RealtimeEngine::new(EngineConfig::new("ws://localhost:8080/ws"));
/// engine.subscribe(EventKind::Notification, |event| println!("{event:?}"));
/// engine.connect(None, None);
/// engine.update_presence("active", serde_json::json!({}));
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeEngine {
    shared: Arc<Shared>,
}

impl RealtimeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// Build an engine whose queue is mirrored into `store` and reloaded
    /// from it now.
    pub fn with_offline_store(config: EngineConfig, store: Arc<dyn OfflineStore>) -> Self {
        Self::build(config, Some(store))
    }

    fn build(config: EngineConfig, store: Option<Arc<dyn OfflineStore>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new(config, store)),
                bus: EventBus::new(),
                control: Mutex::new(None),
            }),
        }
    }

    // ─── Connection ──────────────────────────────────────────────────

    /// Open the connection and return its id.
    ///
    /// `url` overrides the configured endpoint. While a connection is already
    /// being opened or is open, its id is returned and nothing else happens.
    /// Failures are reported through `error` events.
    pub fn connect(&self, url: Option<&str>, options: Option<ConnectOptions>) -> String {
        let started = self.shared.apply(|state| {
            if state.is_active() {
                return Err(state.connection_id().unwrap_or_default());
            }
            let url = url.map_or_else(|| state.url().to_string(), str::to_string);
            let (id, generation) = state.begin(options.as_ref());
            Ok((id, generation, url))
        });
        let (id, generation, url) = match started {
            Ok(started) => started,
            Err(current) => return current,
        };

        let Ok(runtime) = Handle::try_current() else {
            self.shared
                .apply(|state| state.abort_begin(generation, EngineError::NoRuntime));
            return id;
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        if let Some(previous) = lock(&self.shared.control).replace(stop_tx) {
            let _ = previous.send(true);
        }

        log::info!("Connecting to {url} as {id}");
        runtime.spawn(supervise(Arc::clone(&self.shared), url, generation, stop_rx));
        id
    }

    /// Close with a normal-closure frame and clear presence, sessions and
    /// the outbound queue. No reconnect follows.
    pub fn disconnect(&self) {
        self.shared.apply(EngineState::disconnect);
        if let Some(stop) = lock(&self.shared.control).take() {
            let _ = stop.send(true);
        }
    }

    // ─── Messaging ───────────────────────────────────────────────────

    /// Send a frame. Returns `true` if it was handed to the socket, `false`
    /// if it was queued (or dropped because the queue is full).
    pub fn send(&self, kind: impl Into<FrameKind>, data: Value) -> bool {
        self.send_with(kind, data, SendOptions::default())
    }

    pub fn send_with(&self, kind: impl Into<FrameKind>, data: Value, options: SendOptions) -> bool {
        let kind = kind.into();
        self.shared.apply(|state| state.send(kind, data, options))
    }

    /// Register `callback` for one event kind.
    ///
    /// Callbacks run synchronously on whichever thread produced the event,
    /// never under the engine lock.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, callback)
    }

    pub fn update_presence(&self, status: &str, metadata: Value) -> bool {
        self.shared.apply(|state| state.update_presence(status, metadata))
    }

    pub fn join_collaboration_session(&self, session_id: &str, metadata: Value) -> bool {
        self.shared
            .apply(|state| state.join_collaboration_session(session_id, metadata))
    }

    pub fn leave_collaboration_session(&self, session_id: &str) -> bool {
        self.shared
            .apply(|state| state.leave_collaboration_session(session_id))
    }

    pub fn send_collaboration_event(&self, session_id: &str, event: &str, payload: Value) -> bool {
        self.shared
            .apply(|state| state.send_collaboration_event(session_id, event, payload))
    }

    // ─── Read access ─────────────────────────────────────────────────

    pub fn metrics(&self) -> MetricsSnapshot {
        let subscriptions = self.shared.bus.subscriber_count();
        self.shared.read(|state| state.metrics(subscriptions))
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.read(EngineState::connection_state)
    }

    pub fn connection_id(&self) -> Option<String> {
        self.shared.read(EngineState::connection_id)
    }

    pub fn user_id(&self) -> String {
        self.shared.read(|state| state.user_id().to_string())
    }

    pub fn presence(&self, user_id: &str) -> Option<PresenceRecord> {
        self.shared.read(|state| state.presence(user_id))
    }

    /// All presence records, ordered by user id.
    pub fn presence_snapshot(&self) -> Vec<PresenceRecord> {
        self.shared.read(EngineState::presence_snapshot)
    }

    pub fn collaboration_session(&self, session_id: &str) -> Option<CollaborationSession> {
        self.shared.read(|state| state.collaboration_session(session_id))
    }

    /// Frames waiting for the next open connection, oldest first.
    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.shared.read(EngineState::queued_messages)
    }
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("connection_id", &self.connection_id())
            .field("state", &self.connection_state())
            .finish()
    }
}
