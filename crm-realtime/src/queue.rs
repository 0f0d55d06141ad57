//! Outbound queue for frames sent while the connection is not open.
//!
//! Items leave the queue strictly from the front, so delivery order always
//! matches enqueue order. A failing item blocks the ones behind it until it
//! is delivered or its retry budget runs out.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Frame;

/// A frame waiting for a live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: Uuid,
    pub frame: Frame,
    /// ms since epoch
    pub enqueued_at: u64,
    pub retry_count: u32,
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport is gone; stop flushing after this attempt.
    Offline,
    /// This item could not be sent; the same item is retried.
    Rejected(String),
}

impl DeliveryError {
    fn reason(&self) -> String {
        match self {
            DeliveryError::Offline => "connection closed".to_string(),
            DeliveryError::Rejected(reason) => reason.clone(),
        }
    }
}

/// Outcome of one [`OutboundQueue::flush`] pass.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Items handed to the transport, in order. Delivery ends at the
    /// transport boundary: a later socket write failure does not bring them
    /// back.
    pub delivered: Vec<QueuedMessage>,
    /// Items discarded after exhausting their retries, with the last error.
    pub failed: Vec<(QueuedMessage, String)>,
    /// The pass stopped early because the transport went away.
    pub halted: bool,
}

pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
    max_retries: u32,
}

impl OutboundQueue {
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            max_retries: max_retries.max(1),
        }
    }

    /// Append a frame. Returns `None` when the queue is full.
    pub fn enqueue(&mut self, frame: Frame, now: u64) -> Option<&QueuedMessage> {
        if self.items.len() >= self.capacity {
            return None;
        }
        self.items.push_back(QueuedMessage {
            id: Uuid::new_v4(),
            frame,
            enqueued_at: now,
            retry_count: 0,
        });
        self.items.back()
    }

    /// Put previously persisted items back, keeping their order and retry counts.
    ///
    /// Returns how many were accepted before the queue filled up.
    pub fn restore(&mut self, items: impl IntoIterator<Item = QueuedMessage>) -> usize {
        let mut restored = 0;
        for item in items {
            if self.items.len() >= self.capacity {
                break;
            }
            self.items.push_back(item);
            restored += 1;
        }
        restored
    }

    /// Deliver items front to back.
    ///
    /// Each failure bumps the item's `retry_count`; at `max_retries` the item
    /// is dropped into [`FlushReport::failed`] and the pass moves on.
    /// [`DeliveryError::Offline`] ends the pass, leaving the rest in place.
    pub fn flush<F>(&mut self, mut deliver: F) -> FlushReport
    where
        F: FnMut(&QueuedMessage) -> Result<(), DeliveryError>,
    {
        let mut report = FlushReport::default();

        while let Some(front) = self.items.front_mut() {
            match deliver(front) {
                Ok(()) => {
                    if let Some(item) = self.items.pop_front() {
                        report.delivered.push(item);
                    }
                }
                Err(err) => {
                    front.retry_count += 1;
                    if front.retry_count >= self.max_retries {
                        if let Some(item) = self.items.pop_front() {
                            report.failed.push((item, err.reason()));
                        }
                    }
                    if err == DeliveryError::Offline {
                        report.halted = true;
                        break;
                    }
                }
            }
        }

        report
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Remove everything, returning the discarded items.
    pub fn clear(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(n: u64) -> Frame {
        Frame::new("data_update", json!({"n": n}), n, "conn")
    }

    fn numbers(items: &[QueuedMessage]) -> Vec<u64> {
        items.iter().map(|i| i.frame.data()["n"].as_u64().unwrap()).collect()
    }

    #[test]
    fn test_enqueue_keeps_order() {
        let mut queue = OutboundQueue::new(100, 3);
        for n in 1..=4 {
            let item = queue.enqueue(frame(n), 1000 + n).unwrap();
            assert_eq!(item.retry_count, 0);
        }
        let queued: Vec<QueuedMessage> = queue.iter().cloned().collect();
        assert_eq!(numbers(&queued), vec![1, 2, 3, 4]);
        assert_eq!(queued[0].enqueued_at, 1001);
    }

    #[test]
    fn test_capacity() {
        let mut queue = OutboundQueue::new(2, 3);
        assert!(queue.enqueue(frame(1), 0).is_some());
        assert!(queue.enqueue(frame(2), 0).is_some());
        assert!(queue.enqueue(frame(3), 0).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_flush_delivers_in_order() {
        let mut queue = OutboundQueue::new(100, 3);
        for n in 1..=3 {
            queue.enqueue(frame(n), 0);
        }

        let mut wire = Vec::new();
        let report = queue.flush(|item| {
            wire.push(item.frame.data()["n"].as_u64().unwrap());
            Ok(())
        });

        assert_eq!(wire, vec![1, 2, 3]);
        assert_eq!(numbers(&report.delivered), vec![1, 2, 3]);
        assert!(report.failed.is_empty());
        assert!(!report.halted);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_drops_item_after_three_rejections() {
        let mut queue = OutboundQueue::new(100, 3);
        for n in 1..=3 {
            queue.enqueue(frame(n), 0);
        }

        let mut attempts_on_two = 0;
        let report = queue.flush(|item| {
            if item.frame.data()["n"] == 2 {
                attempts_on_two += 1;
                Err(DeliveryError::Rejected("server refused".into()))
            } else {
                Ok(())
            }
        });

        assert_eq!(attempts_on_two, 3);
        assert_eq!(numbers(&report.delivered), vec![1, 3]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.retry_count, 3);
        assert_eq!(report.failed[0].1, "server refused");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_offline_halts_and_preserves_rest() {
        let mut queue = OutboundQueue::new(100, 3);
        for n in 1..=3 {
            queue.enqueue(frame(n), 0);
        }

        let report = queue.flush(|item| {
            if item.frame.data()["n"] == 1 {
                Ok(())
            } else {
                Err(DeliveryError::Offline)
            }
        });

        assert!(report.halted);
        assert_eq!(numbers(&report.delivered), vec![1]);
        let left: Vec<QueuedMessage> = queue.iter().cloned().collect();
        assert_eq!(numbers(&left), vec![2, 3]);
        assert_eq!(left[0].retry_count, 1);
        assert_eq!(left[1].retry_count, 0);
    }

    #[test]
    fn test_retry_count_survives_across_flushes() {
        let mut queue = OutboundQueue::new(100, 3);
        queue.enqueue(frame(1), 0);
        queue.enqueue(frame(2), 0);

        for _ in 0..2 {
            let report = queue.flush(|_| Err(DeliveryError::Offline));
            assert!(report.failed.is_empty());
        }
        let report = queue.flush(|_| Err(DeliveryError::Offline));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1, "connection closed");

        let left: Vec<QueuedMessage> = queue.iter().cloned().collect();
        assert_eq!(numbers(&left), vec![2]);
        assert_eq!(left[0].retry_count, 0);
    }

    #[test]
    fn test_restore_and_clear() {
        let mut source = OutboundQueue::new(100, 3);
        source.enqueue(frame(7), 0);
        source.enqueue(frame(8), 0);
        let saved = source.clear();
        assert!(source.is_empty());

        let mut queue = OutboundQueue::new(1, 3);
        assert_eq!(queue.restore(saved), 1);
        let left: Vec<QueuedMessage> = queue.iter().cloned().collect();
        assert_eq!(numbers(&left), vec![7]);
    }

    #[test]
    fn test_queued_message_serializes() {
        let mut queue = OutboundQueue::new(10, 3);
        let item = queue.enqueue(frame(1), 55).unwrap().clone();
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["enqueuedAt"], 55);
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["frame"]["type"], "data_update");

        let back: QueuedMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }
}
