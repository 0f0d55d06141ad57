//! Engine state and the message router.
//!
//! `EngineState` holds everything the engine knows: connection bookkeeping,
//! presence, collaboration sessions, the outbound queue, heartbeat and
//! counters. It performs no I/O. The socket task hands it inbound text and
//! lifecycle notifications; it writes outbound frames into the writer channel
//! of the open socket and records events in `pending`, which the engine
//! dispatches after releasing its lock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::collab::{CollaborationRegistry, CollaborationSession, SessionEvent};
use crate::config::{ConnectOptions, EngineConfig, SendOptions};
use crate::connection::{normal_closure, CloseInfo, ConnectionState, NORMAL_CLOSURE};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::presence::{PresenceRecord, PresenceTracker};
use crate::protocol::{now_millis, Frame, FrameKind, ProtocolError};
use crate::queue::{DeliveryError, OutboundQueue, QueuedMessage};
use crate::store::OfflineStore;

/// Writer half handed over by the socket task.
pub(crate) type Outgoing = UnboundedSender<Message>;

fn deliver(outgoing: &Outgoing, frame: &Frame) -> Result<(), DeliveryError> {
    let text = frame
        .encode()
        .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
    outgoing
        .send(Message::Text(text.into()))
        .map_err(|_| DeliveryError::Offline)
}

pub(crate) struct EngineState {
    base_config: EngineConfig,
    /// Base config with the current `connect()` overrides applied
    config: EngineConfig,
    connection_id: Option<String>,
    connection_state: ConnectionState,
    reconnect_attempts: u32,
    generation: u64,
    outgoing: Option<Outgoing>,
    last_timestamp: u64,
    presence: PresenceTracker,
    sessions: CollaborationRegistry,
    queue: OutboundQueue,
    heartbeat: HeartbeatMonitor,
    metrics: EngineMetrics,
    store: Option<Arc<dyn OfflineStore>>,
    pending: Vec<EngineEvent>,
}

impl EngineState {
    pub fn new(config: EngineConfig, store: Option<Arc<dyn OfflineStore>>) -> Self {
        let mut queue = OutboundQueue::new(config.max_queued_messages, config.max_queue_retries);
        if let Some(store) = &store {
            let restored = queue.restore(store.load());
            if restored > 0 {
                log::info!("Restored {restored} queued messages from offline store");
            }
        }

        Self {
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
            base_config: config.clone(),
            config,
            connection_id: None,
            connection_state: ConnectionState::Closed,
            reconnect_attempts: 0,
            generation: 0,
            outgoing: None,
            last_timestamp: 0,
            presence: PresenceTracker::new(),
            sessions: CollaborationRegistry::new(),
            queue,
            metrics: EngineMetrics::new(),
            store,
            pending: Vec::new(),
        }
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.pending)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.pending.push(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    // ─── Connection lifecycle ────────────────────────────────────────

    /// Whether a connection is being opened or is open.
    pub fn is_active(&self) -> bool {
        matches!(
            self.connection_state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    /// Start a new logical connection. Returns its id and generation.
    pub fn begin(&mut self, options: Option<&ConnectOptions>) -> (String, u64) {
        self.config = match options {
            Some(options) => options.apply(&self.base_config),
            None => self.base_config.clone(),
        };
        self.heartbeat.set_interval(self.config.heartbeat_interval);

        let id = Uuid::new_v4().to_string();
        self.connection_id = Some(id.clone());
        self.connection_state = ConnectionState::Connecting;
        self.reconnect_attempts = 0;
        self.generation += 1;
        (id, self.generation)
    }

    /// The connection could not even be started.
    pub fn abort_begin(&mut self, generation: u64, error: EngineError) {
        if !self.is_current(generation) {
            return;
        }
        log::error!("Cannot start connection: {error}");
        self.connection_state = ConnectionState::Closed;
        self.emit(EngineEvent::Error(error));
    }

    pub fn begin_reconnect(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.connection_state = ConnectionState::Connecting;
        true
    }

    /// The socket is open. Returns the heartbeat period, or `None` if the
    /// task is stale.
    pub fn on_open(&mut self, generation: u64, outgoing: Outgoing) -> Option<Duration> {
        if !self.is_current(generation) {
            return None;
        }
        self.connection_state = ConnectionState::Open;
        self.reconnect_attempts = 0;
        self.outgoing = Some(outgoing);
        self.heartbeat.start();

        let connection_id = self.connection_id.clone().unwrap_or_default();
        log::info!("Connection {connection_id} open");

        self.flush_queue();
        self.emit(EngineEvent::Connected { connection_id });
        Some(self.heartbeat.interval())
    }

    /// The socket closed (or never opened). Returns the backoff delay if a
    /// reconnect should follow.
    pub fn on_close(&mut self, generation: u64, close: CloseInfo) -> Option<Duration> {
        if !self.is_current(generation) {
            return None;
        }
        let was_open = self.connection_state == ConnectionState::Open;
        self.outgoing = None;
        self.heartbeat.stop();
        self.connection_state = ConnectionState::Closed;

        if was_open {
            log::info!(
                "Connection closed (code {:?}, {})",
                close.code,
                if close.clean { "clean" } else { "unclean" }
            );
            self.emit(EngineEvent::Disconnected {
                code: close.code,
                clean: close.clean,
            });
        }

        if close.clean {
            return None;
        }

        match self.config.reconnect_policy().next(self.reconnect_attempts) {
            Some((attempt, delay)) => {
                self.reconnect_attempts = attempt;
                self.metrics.reconnections += 1;
                log::info!("Reconnect attempt {attempt} in {delay:?}");
                self.emit(EngineEvent::Reconnecting { attempt, delay });
                Some(delay)
            }
            None => {
                let attempts = self.reconnect_attempts;
                log::warn!("Giving up after {attempts} reconnect attempts");
                self.emit(EngineEvent::Error(EngineError::ReconnectExhausted { attempts }));
                None
            }
        }
    }

    pub fn on_transport_error(&mut self, generation: u64, message: String) {
        if !self.is_current(generation) {
            return;
        }
        log::warn!("Transport error: {message}");
        self.emit(EngineEvent::Error(EngineError::Transport(message)));
    }

    /// Close with a normal-closure frame and drop all session state.
    pub fn disconnect(&mut self) {
        self.generation += 1;
        let was_open = self.connection_state == ConnectionState::Open;
        self.connection_state = ConnectionState::Closing;

        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(normal_closure());
        }
        self.heartbeat.stop();
        self.reconnect_attempts = 0;
        self.presence.clear();
        self.sessions.clear();
        for item in self.queue.clear() {
            if let Some(store) = &self.store {
                store.remove(item.id);
            }
        }

        self.connection_state = ConnectionState::Closed;
        if let Some(id) = self.connection_id.take() {
            log::info!("Connection {id} closed by client");
        }
        if was_open {
            self.emit(EngineEvent::Disconnected {
                code: Some(NORMAL_CLOSURE),
                clean: true,
            });
        }
    }

    pub fn heartbeat_tick(&mut self, generation: u64) {
        if !self.is_current(generation) || self.connection_state != ConnectionState::Open {
            return;
        }
        if self.heartbeat.on_beat() {
            let data = json!({ "timestamp": now_millis() });
            self.send(FrameKind::Heartbeat, data, SendOptions::volatile());
        }
    }

    // ─── Outbound ────────────────────────────────────────────────────

    /// Build and transmit a frame. Returns `true` if it went to the socket,
    /// `false` if it was queued or dropped.
    pub fn send(&mut self, kind: FrameKind, data: Value, options: SendOptions) -> bool {
        let frame = self.build_frame(kind, data, &options);
        self.submit(frame, options.queue_if_offline)
    }

    fn build_frame(&mut self, kind: FrameKind, data: Value, options: &SendOptions) -> Frame {
        let timestamp = now_millis().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let sender = self.connection_id.clone().unwrap_or_default();
        let mut frame = Frame::new(kind, data, timestamp, sender);
        if let Some(session_id) = &options.session_id {
            frame = frame.with_session_id(session_id.clone());
        }
        if let Some(event) = &options.event {
            frame = frame.with_event(event.clone());
        }
        if let Some(payload) = &options.payload {
            frame = frame.with_payload(payload.clone());
        }
        frame
    }

    fn submit(&mut self, frame: Frame, queue_if_offline: bool) -> bool {
        if self.connection_state == ConnectionState::Open {
            // Queued frames go first; a new frame never overtakes them.
            self.flush_queue();
            if self.queue.is_empty() {
                if let Some(outgoing) = &self.outgoing {
                    match deliver(outgoing, &frame) {
                        Ok(()) => {
                            self.metrics.messages_sent += 1;
                            log::debug!("Sent {} frame", frame.kind());
                            return true;
                        }
                        Err(DeliveryError::Rejected(reason)) => {
                            log::warn!("Dropping unsendable {} frame: {reason}", frame.kind());
                            self.emit(EngineEvent::Error(EngineError::Transport(reason)));
                            return false;
                        }
                        Err(DeliveryError::Offline) => {
                            log::debug!("Writer closed; queueing {} frame", frame.kind());
                        }
                    }
                }
            }
        }

        if !queue_if_offline {
            log::debug!("Dropping {} frame while offline", frame.kind());
            return false;
        }
        self.enqueue(frame);
        false
    }

    fn enqueue(&mut self, frame: Frame) {
        let kind = frame.kind().clone();
        match self.queue.enqueue(frame, now_millis()) {
            Some(item) => {
                if let Some(store) = &self.store {
                    store.persist(item);
                }
                log::debug!("Queued {kind} frame ({} pending)", self.queue.len());
            }
            None => {
                let capacity = self.queue.capacity();
                log::warn!("Outbound queue full; dropping {kind} frame");
                self.emit(EngineEvent::Error(EngineError::QueueFull { capacity }));
            }
        }
    }

    /// Drain the queue into the writer channel.
    ///
    /// A writer whose socket task is gone fails with `Offline`: the front
    /// item is charged one attempt and the pass stops. Each later open
    /// retries that item first, so an item that hits a dead writer on three
    /// opens is discarded with `sync-failed` while the items behind it keep
    /// their order and retry counts.
    ///
    /// `sync-success` means the frame was handed to the writer channel. A
    /// socket write that fails afterwards is reported as a transport error
    /// and the frame is not re-queued.
    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Some(outgoing) = self.outgoing.clone() else {
            return;
        };

        let report = self.queue.flush(|item| deliver(&outgoing, &item.frame));
        if !report.delivered.is_empty() {
            log::info!("Flushed {} queued messages", report.delivered.len());
        }

        for item in report.delivered {
            self.metrics.messages_sent += 1;
            if let Some(store) = &self.store {
                store.remove(item.id);
            }
            self.emit(EngineEvent::SyncSuccess { item });
        }
        for (item, reason) in report.failed {
            if let Some(store) = &self.store {
                store.remove(item.id);
            }
            log::warn!(
                "Discarding queued {} frame {} after {} attempts: {reason}",
                item.frame.kind(),
                item.id,
                item.retry_count
            );
            let error = EngineError::QueueExhausted {
                id: item.id,
                attempts: item.retry_count,
                reason,
            };
            self.emit(EngineEvent::SyncFailed { item, error });
        }
        if report.halted {
            log::debug!("Flush halted with {} messages left", self.queue.len());
        }
    }

    pub fn update_presence(&mut self, status: &str, metadata: Value) -> bool {
        let data = json!({
            "userId": self.base_config.user_id,
            "status": status,
            "metadata": metadata,
        });
        self.send(FrameKind::PresenceUpdate, data, SendOptions::default())
    }

    pub fn join_collaboration_session(&mut self, session_id: &str, metadata: Value) -> bool {
        let user_id = self.base_config.user_id.clone();
        self.sessions.join(session_id, &user_id);
        let data = json!({
            "sessionId": session_id,
            "userId": user_id,
            "metadata": metadata,
        });
        self.send(FrameKind::JoinCollaboration, data, SendOptions::default())
    }

    pub fn leave_collaboration_session(&mut self, session_id: &str) -> bool {
        let user_id = self.base_config.user_id.clone();
        self.sessions.leave(session_id, &user_id);
        let data = json!({ "sessionId": session_id, "userId": user_id });
        self.send(FrameKind::LeaveCollaboration, data, SendOptions::default())
    }

    pub fn send_collaboration_event(&mut self, session_id: &str, event: &str, payload: Value) -> bool {
        let data = json!({
            "sessionId": session_id,
            "userId": self.base_config.user_id,
            "event": event,
            "payload": payload,
        });
        self.send(FrameKind::CollaborationEvent, data, SendOptions::default())
    }

    // ─── Inbound routing ─────────────────────────────────────────────

    pub fn on_text(&mut self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }
        match Frame::decode(text) {
            Ok(frame) => self.on_frame(frame, now_millis()),
            Err(e) => {
                log::warn!("Dropping malformed frame: {e}");
                self.emit(EngineEvent::Error(e.into()));
            }
        }
    }

    fn on_frame(&mut self, frame: Frame, now: u64) {
        self.metrics.messages_received += 1;
        log::debug!("Received {} frame from '{}'", frame.kind(), frame.sender());

        let kind = frame.kind().clone();
        match kind {
            FrameKind::PresenceUpdate => self.handle_presence(&frame, now),
            FrameKind::CollaborationEvent => self.handle_collaboration_event(&frame),
            FrameKind::JoinCollaboration => self.handle_participant(&frame, true),
            FrameKind::LeaveCollaboration => self.handle_participant(&frame, false),
            FrameKind::Heartbeat => {
                let data = json!({ "timestamp": frame.timestamp() });
                self.send(FrameKind::HeartbeatResponse, data, SendOptions::volatile());
            }
            FrameKind::HeartbeatResponse => {
                let sent_at = frame
                    .data()
                    .get("timestamp")
                    .and_then(Value::as_u64)
                    .unwrap_or(frame.timestamp());
                let latency = self.heartbeat.record_round_trip(sent_at, now);
                log::debug!(
                    "Heartbeat round trip {latency}ms (avg {:.1}ms)",
                    self.heartbeat.avg_latency()
                );
            }
            FrameKind::Notification => self.emit(EngineEvent::Notification(frame)),
            FrameKind::DataUpdate => self.emit(EngineEvent::DataUpdate(frame)),
            FrameKind::SystemMessage => self.emit(EngineEvent::SystemMessage(frame)),
            FrameKind::Other(_) => self.emit(EngineEvent::Message(frame)),
        }
    }

    fn missing(&mut self, kind: &FrameKind, field: &'static str) {
        log::warn!("Dropping {kind} frame without '{field}'");
        self.emit(EngineEvent::Error(ProtocolError::MissingField(field).into()));
    }

    fn handle_presence(&mut self, frame: &Frame, now: u64) {
        let Some(user_id) = frame.str_field("userId") else {
            return self.missing(frame.kind(), "userId");
        };
        let status = frame.str_field("status").unwrap_or("unknown");
        let metadata = frame.value_field("metadata").cloned().unwrap_or(Value::Null);

        let record = self.presence.apply(user_id, status, metadata, now).clone();
        self.emit(EngineEvent::PresenceUpdate(record));
    }

    /// User id behind a frame: `userId`, else the sender. Frames sent from
    /// our own connection resolve to the local user id.
    fn participant_of(&self, frame: &Frame) -> Option<String> {
        if let Some(user_id) = frame.str_field("userId") {
            return Some(user_id.to_string());
        }
        let sender = frame.str_field("sender")?;
        if self.connection_id.as_deref() == Some(sender) {
            Some(self.base_config.user_id.clone())
        } else {
            Some(sender.to_string())
        }
    }

    fn handle_collaboration_event(&mut self, frame: &Frame) {
        let Some(session_id) = frame.str_field("sessionId") else {
            return self.missing(frame.kind(), "sessionId");
        };
        let participant = self.participant_of(frame);
        let event = SessionEvent {
            event: frame.str_field("event").unwrap_or("update").to_string(),
            payload: frame.value_field("payload").cloned().unwrap_or(Value::Null),
            timestamp: frame.timestamp(),
            sender: frame.sender().to_string(),
        };

        self.sessions
            .apply_event(session_id, participant.as_deref(), event.clone());
        self.emit(EngineEvent::CollaborationEvent {
            session_id: session_id.to_string(),
            event,
        });
    }

    fn handle_participant(&mut self, frame: &Frame, joined: bool) {
        let Some(session_id) = frame.str_field("sessionId") else {
            return self.missing(frame.kind(), "sessionId");
        };
        let Some(user_id) = self.participant_of(frame) else {
            return self.missing(frame.kind(), "userId");
        };

        let changed = if joined {
            self.sessions.join(session_id, &user_id)
        } else {
            self.sessions.leave(session_id, &user_id)
        };
        if changed {
            self.emit(EngineEvent::Participant {
                session_id: session_id.to_string(),
                user_id,
                joined,
            });
        }
    }

    // ─── Read access ─────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.clone()
    }

    pub fn url(&self) -> &str {
        &self.base_config.url
    }

    pub fn user_id(&self) -> &str {
        &self.base_config.user_id
    }

    #[cfg(test)]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn presence(&self, user_id: &str) -> Option<PresenceRecord> {
        self.presence.get(user_id).cloned()
    }

    pub fn presence_snapshot(&self) -> Vec<PresenceRecord> {
        self.presence.snapshot()
    }

    pub fn collaboration_session(&self, session_id: &str) -> Option<CollaborationSession> {
        self.sessions.get(session_id).cloned()
    }

    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.queue.iter().cloned().collect()
    }

    pub fn metrics(&self, active_subscriptions: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.metrics.messages_sent,
            messages_received: self.metrics.messages_received,
            reconnections: self.metrics.reconnections,
            avg_latency: self.heartbeat.avg_latency(),
            uptime: self.metrics.uptime().as_millis() as u64,
            is_connected: self.connection_state == ConnectionState::Open,
            queued_messages: self.queue.len(),
            active_subscriptions,
            presence_count: self.presence.len(),
            collaboration_sessions: self.sessions.len(),
        }
    }
}
