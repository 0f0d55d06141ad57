//! Engine error taxonomy.
//!
//! None of these are returned from public operations. They travel to
//! subscribers inside `error` and `sync-failed` events.

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Socket open, read or write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound frame could not be parsed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A queued frame failed delivery too many times and was discarded.
    #[error("queued message {id} discarded after {attempts} failed deliveries: {reason}")]
    QueueExhausted {
        id: Uuid,
        attempts: u32,
        reason: String,
    },

    /// The outbound queue is at capacity; the frame was dropped.
    #[error("outbound queue full ({capacity} messages)")]
    QueueFull { capacity: usize },

    /// The reconnect budget is spent; `connect()` must be called again.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// `connect()` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}

impl EngineError {
    /// Whether the engine will keep trying on its own after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Transport(_) | EngineError::Protocol(_))
    }
}
