//! Engine counters and the snapshot handed to callers.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Running counters. Lives for the whole engine instance; `disconnect()`
/// does not reset them.
#[derive(Debug)]
pub struct EngineMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnections: u64,
    started_at: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: 0,
            messages_received: 0,
            reconnections: 0,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view returned by `RealtimeEngine::metrics()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnections: u64,
    /// ms, folded as `(avg + sample) / 2`
    pub avg_latency: f64,
    /// ms since the engine was constructed
    pub uptime: u64,
    pub is_connected: bool,
    pub queued_messages: usize,
    pub active_subscriptions: usize,
    pub presence_count: usize,
    pub collaboration_sessions: usize,
}
