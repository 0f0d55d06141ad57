//! JSON wire protocol for the real-time channel.
//!
//! Every frame is one JSON text message:
//! ```text
//! { "type": "presence_update",
//!   "data": { ... },
//!   "timestamp": 1718000000000,      // ms since epoch
//!   "sender": "<connection id>",
//!   "sessionId": "...",              // optional
//!   "event": "...",                  // optional
//!   "payload": { ... } }             // optional
//! ```
//!
//! Fields beyond the known ones are kept in [`Frame::extra`] so that frames of
//! unrecognized types can be forwarded without loss.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Frame types understood by the router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FrameKind {
    PresenceUpdate,
    CollaborationEvent,
    Notification,
    DataUpdate,
    SystemMessage,
    Heartbeat,
    HeartbeatResponse,
    JoinCollaboration,
    LeaveCollaboration,
    /// Anything else; forwarded to generic `message` subscribers.
    Other(String),
}

impl FrameKind {
    pub fn as_str(&self) -> &str {
        match self {
            FrameKind::PresenceUpdate => "presence_update",
            FrameKind::CollaborationEvent => "collaboration_event",
            FrameKind::Notification => "notification",
            FrameKind::DataUpdate => "data_update",
            FrameKind::SystemMessage => "system_message",
            FrameKind::Heartbeat => "heartbeat",
            FrameKind::HeartbeatResponse => "heartbeat_response",
            FrameKind::JoinCollaboration => "join_collaboration",
            FrameKind::LeaveCollaboration => "leave_collaboration",
            FrameKind::Other(name) => name,
        }
    }

    /// Whether the router has a dedicated handler for this kind.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, FrameKind::Other(_))
    }
}

impl From<&str> for FrameKind {
    fn from(name: &str) -> Self {
        match name {
            "presence_update" => FrameKind::PresenceUpdate,
            "collaboration_event" => FrameKind::CollaborationEvent,
            "notification" => FrameKind::Notification,
            "data_update" => FrameKind::DataUpdate,
            "system_message" => FrameKind::SystemMessage,
            "heartbeat" => FrameKind::Heartbeat,
            "heartbeat_response" => FrameKind::HeartbeatResponse,
            "join_collaboration" => FrameKind::JoinCollaboration,
            "leave_collaboration" => FrameKind::LeaveCollaboration,
            other => FrameKind::Other(other.to_string()),
        }
    }
}

impl From<String> for FrameKind {
    fn from(name: String) -> Self {
        match FrameKind::from(name.as_str()) {
            FrameKind::Other(_) => FrameKind::Other(name),
            known => known,
        }
    }
}

impl From<FrameKind> for String {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message unit on the wire.
///
/// Frames are immutable after construction: the `with_*` builders consume the
/// frame while it is being assembled and there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    kind: FrameKind,
    #[serde(default)]
    data: Value,
    #[serde(default, deserialize_with = "lenient_millis")]
    timestamp: u64,
    #[serde(default)]
    sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Frame {
    pub fn new(
        kind: impl Into<FrameKind>,
        data: Value,
        timestamp: u64,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp,
            sender: sender.into(),
            session_id: None,
            event: None,
            payload: None,
            extra: Map::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Top-level fields that are not part of the fixed schema.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Look up a string field, preferring the top level over `data`.
    ///
    /// Senders disagree on whether `sessionId`/`event` travel beside `data`
    /// or inside it, so readers accept both.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        let top = match name {
            "sessionId" => self.session_id.as_deref(),
            "event" => self.event.as_deref(),
            "sender" => Some(self.sender.as_str()).filter(|s| !s.is_empty()),
            _ => self.extra.get(name).and_then(Value::as_str),
        };
        top.or_else(|| self.data.get(name).and_then(Value::as_str))
    }

    /// Look up a JSON field, preferring the top level over `data`.
    pub fn value_field(&self, name: &str) -> Option<&Value> {
        let top = match name {
            "payload" => self.payload.as_ref(),
            _ => self.extra.get(name),
        };
        top.or_else(|| self.data.get(name))
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if value.get("type").and_then(Value::as_str).is_none() {
            return Err(ProtocolError::MissingField("type"));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Accept any JSON number (or null) as a millisecond timestamp. Fractions
/// are truncated and negative values clamp to zero.
fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => Ok(n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().map(|v| v.max(0.0) as u64))
            .unwrap_or(0)),
        other => Err(serde::de::Error::custom(format!(
            "timestamp must be a number, got {other}"
        ))),
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wire-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("frame is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}
