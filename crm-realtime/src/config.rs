//! Engine configuration.

use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::backoff::ReconnectPolicy;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Endpoint used when `connect()` is called without a URL
    pub url: String,
    /// Identity announced in presence and collaboration frames
    pub user_id: String,
    /// Reconnect attempts after an unclean close before giving up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt; doubles on each attempt
    pub reconnect_base_delay: Duration,
    /// Keepalive period while the connection is open
    pub heartbeat_interval: Duration,
    /// Failed deliveries after which a queued frame is discarded
    pub max_queue_retries: u32,
    /// Outbound queue capacity
    pub max_queued_messages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: Self::endpoint("localhost:8080", false),
            user_id: Uuid::new_v4().to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(30),
            max_queue_retries: 3,
            max_queued_messages: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create a configuration for the given endpoint with defaults elsewhere.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build the socket endpoint for a host. The scheme mirrors the page's
    /// transport security: `wss` when `secure`, `ws` otherwise.
    pub fn endpoint(host: &str, secure: bool) -> String {
        let scheme = if secure { "wss" } else { "ws" };
        format!("{scheme}://{}/ws", host.trim_end_matches('/'))
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_reconnect_attempts, self.reconnect_base_delay)
    }
}

/// Per-connection overrides passed to `connect()`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_base_delay: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
}

impl ConnectOptions {
    /// Apply the overrides on top of a base configuration.
    pub fn apply(&self, base: &EngineConfig) -> EngineConfig {
        let mut config = base.clone();
        if let Some(max) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = max;
        }
        if let Some(delay) = self.reconnect_base_delay {
            config.reconnect_base_delay = delay;
        }
        if let Some(interval) = self.heartbeat_interval {
            config.heartbeat_interval = interval;
        }
        config
    }
}

/// Optional fields for an outbound frame.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub session_id: Option<String>,
    pub event: Option<String>,
    pub payload: Option<Value>,
    /// Queue the frame when the connection is not open (otherwise drop it)
    pub queue_if_offline: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            event: None,
            payload: None,
            queue_if_offline: true,
        }
    }
}

impl SendOptions {
    /// Options that drop the frame instead of queueing it while offline.
    pub fn volatile() -> Self {
        Self {
            queue_if_offline: false,
            ..Self::default()
        }
    }
}
