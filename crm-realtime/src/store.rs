//! Hook for persisting queued frames outside the engine.
//!
//! The engine does not own durable storage. When an [`OfflineStore`] is
//! supplied, every queued frame is handed to it and removed again once the
//! frame is delivered or discarded, and whatever the store still holds is
//! loaded back into the queue when the engine is constructed.

use uuid::Uuid;

use crate::queue::QueuedMessage;

pub trait OfflineStore: Send + Sync {
    /// Items left over from a previous run, in enqueue order.
    fn load(&self) -> Vec<QueuedMessage>;

    fn persist(&self, item: &QueuedMessage);

    /// Called once the item is handed to the socket writer or discarded.
    /// Frames lost to a write failure after that point are not recovered.
    fn remove(&self, id: Uuid);
}
