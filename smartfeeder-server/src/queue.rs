//! Pending-dispatch queue: the bridge between materialized schedule
//! occurrences and the devices that eventually drain them.

use chrono::NaiveDateTime;
use smartfeeder_shared::domain::FeederStatus;
use tracing::debug;

use crate::storage::models::{NewQueueEntry, QueueEntry};
use crate::storage::{Store, StorageError};

#[derive(Clone)]
pub struct EventQueue {
    store: Store,
}

impl EventQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Bulk-insert pending entries. Entries missing a required field
    /// (blank address, non-positive count) are dropped silently; partial
    /// batch success is expected, not an error. Returns how many rows
    /// were actually inserted.
    pub async fn enqueue(&self, entries: Vec<NewQueueEntry>) -> Result<usize, StorageError> {
        let total = entries.len();
        let valid: Vec<NewQueueEntry> = entries
            .into_iter()
            .filter(|e| !e.address.is_empty() && !e.kind.is_empty() && e.count >= 1)
            .collect();
        if valid.len() < total {
            debug!(dropped = total - valid.len(), "enqueue: dropped incomplete entries");
        }
        self.store.insert_queue_entries(valid).await
    }

    /// Entries for one feeder that should have fired by `as_of`, oldest
    /// first.
    pub async fn due_entries_for(
        &self,
        feeder_id: i32,
        as_of: NaiveDateTime,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        self.store.due_queue_entries_for_feeder(feeder_id, as_of).await
    }

    /// All due entries across feeders, for the safety-net sweep.
    pub async fn due_entries(&self, as_of: NaiveDateTime) -> Result<Vec<QueueEntry>, StorageError> {
        self.store.due_queue_entries(as_of).await
    }

    /// Settle one entry: log the outcome, refresh the feeder's feed
    /// times, drop the entry. At-most-once per entry id; acknowledging
    /// an entry that is already gone returns `Ok(false)` so the device
    /// poll path and the periodic sweep can race without double-logging.
    pub async fn acknowledge(
        &self,
        entry_id: i32,
        outcome: FeederStatus,
        at: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        self.store
            .acknowledge_entry(entry_id, &outcome.to_string(), at)
            .await
    }
}
