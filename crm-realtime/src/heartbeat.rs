//! Keepalive and round-trip latency tracking.
//!
//! The monitor itself is passive: the connection task ticks it on its interval
//! and feeds it `heartbeat_response` timestamps. Latency samples are folded as
//! `avg' = (avg + sample) / 2`, which weights the newest sample by one half.
//! Metrics consumers depend on that exact sequence.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    running: bool,
    avg_latency: f64,
    last_latency: Option<u64>,
    beats_sent: u64,
    responses: u64,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: false,
            avg_latency: 0.0,
            last_latency: None,
            beats_sent: 0,
            responses: 0,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Count an outgoing heartbeat. Returns `false` when stopped.
    pub fn on_beat(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.beats_sent += 1;
        true
    }

    /// Record a round trip and return the measured latency in ms.
    ///
    /// Clock skew that would make the sample negative yields zero.
    pub fn record_round_trip(&mut self, sent_at: u64, received_at: u64) -> u64 {
        let latency = received_at.saturating_sub(sent_at);
        self.avg_latency = (self.avg_latency + latency as f64) / 2.0;
        self.last_latency = Some(latency);
        self.responses += 1;
        latency
    }

    pub fn avg_latency(&self) -> f64 {
        self.avg_latency
    }

    pub fn last_latency(&self) -> Option<u64> {
        self.last_latency
    }

    pub fn beats_sent(&self) -> u64 {
        self.beats_sent
    }

    pub fn responses(&self) -> u64 {
        self.responses
    }
}
