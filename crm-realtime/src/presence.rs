//! Last-known presence per user.
//!
//! ```text
//! presence_update frame ──► PresenceTracker::apply() ──► presence_update event
//!                              (last write wins)
//! ```
//!
//! Records never expire; a user stays in the table until `disconnect()`
//! clears it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last announced status of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: String,
    pub metadata: Value,
    /// ms since epoch; strictly increasing across updates for the same user
    pub last_seen: u64,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: HashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the record for `user_id`.
    ///
    /// `last_seen` is `now`, bumped past the previous value when the clock
    /// has not advanced (or went backwards) since the last update.
    pub fn apply(
        &mut self,
        user_id: &str,
        status: &str,
        metadata: Value,
        now: u64,
    ) -> &PresenceRecord {
        let last_seen = match self.records.get(user_id) {
            Some(prev) => now.max(prev.last_seen + 1),
            None => now,
        };
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            status: status.to_string(),
            metadata,
            last_seen,
        };
        self.records.insert(user_id.to_string(), record);
        &self.records[user_id]
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.records.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of all records, sorted by user id.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut all: Vec<PresenceRecord> = self.records.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
