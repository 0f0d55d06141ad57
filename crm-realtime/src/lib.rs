//! # crm-realtime: Real-time communication engine for the CRM client
//!
//! Keeps one WebSocket open to the backend, reconnects with exponential
//! backoff, routes typed JSON frames to subscribers, tracks presence and
//! collaboration sessions, and queues outbound frames while offline.
//!
//! ## Architecture
//!
//! ```text
//!   RealtimeEngine (cloneable handle)
//!         │ lock ─► EngineState ─► pending events ─► EventBus (after unlock)
//!         │              ▲
//!         │              │ Shared::apply (generation-checked)
//!         ▼              │
//!   ┌────────────────────┴─┐     JSON text frames     ┌──────────┐
//!   │ socket task (tokio)  │ ◄──────────────────────► │ backend  │
//!   │ read / write / beat  │                          │  /ws     │
//!   │ backoff + reopen     │                          └──────────┘
//!   └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON frame codec
//! - [`connection`]: socket task, lifecycle states, close classification
//! - [`backoff`]: reconnect delay schedule
//! - [`heartbeat`]: keepalive bookkeeping and latency average
//! - [`presence`]: last-write-wins presence records
//! - [`collab`]: collaboration sessions and their event logs
//! - [`queue`]: offline outbound queue with per-item retries
//! - [`events`]: typed publish/subscribe
//! - [`store`]: optional persistence hook for the queue

pub mod backoff;
pub mod collab;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod queue;
pub mod store;

mod state;

// Re-exports for convenience
pub use backoff::ReconnectPolicy;
pub use collab::{CollaborationRegistry, CollaborationSession, SessionEvent};
pub use config::{ConnectOptions, EngineConfig, SendOptions};
pub use connection::{CloseInfo, ConnectionState};
pub use engine::RealtimeEngine;
pub use error::EngineError;
pub use events::{EngineEvent, EventBus, EventKind, Subscription};
pub use heartbeat::HeartbeatMonitor;
pub use metrics::MetricsSnapshot;
pub use presence::{PresenceRecord, PresenceTracker};
pub use protocol::{Frame, FrameKind, ProtocolError};
pub use queue::{DeliveryError, FlushReport, OutboundQueue, QueuedMessage};
pub use store::OfflineStore;
