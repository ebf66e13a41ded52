//! Schedule service: owns each feeder's set of schedule definitions,
//! keeps the cached `next_feed` fresh, and materializes due definitions
//! into pending queue entries.

use chrono::NaiveDateTime;
use smartfeeder_shared::domain::{ScheduleDef, ScheduleKind, ScheduleValidationError};
use smartfeeder_shared::schedule::next_occurrence;
use tracing::debug;

use crate::queue::EventQueue;
use crate::storage::models::NewQueueEntry;
use crate::storage::{Store, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("feeder not found: {0}")]
    NotFound(i32),

    #[error(transparent)]
    Invalid(#[from] ScheduleValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct ScheduleService {
    store: Store,
    queue: EventQueue,
}

impl ScheduleService {
    pub fn new(store: Store, queue: EventQueue) -> Self {
        Self { store, queue }
    }

    /// Add a definition to a feeder's schedule set.
    ///
    /// Returns `false` when a structurally identical definition already
    /// existed (the insert is then a no-op). Either way the feeder's
    /// `next_feed` is recomputed, and if the definition's next occurrence
    /// falls today or earlier one queue entry is materialized right away,
    /// covering schedules added after the daily sweep already ran.
    pub async fn add_schedule(
        &self,
        feeder_id: i32,
        def: &ScheduleDef,
        now: NaiveDateTime,
    ) -> Result<bool, ScheduleError> {
        let feeder = self
            .store
            .get_feeder(feeder_id)
            .await?
            .ok_or(ScheduleError::NotFound(feeder_id))?;

        let inserted = self.store.add_schedule_item(feeder_id, def).await?;
        self.store.refresh_next_feed(feeder_id, now).await?;

        let occurrence = next_occurrence(def, now);
        if occurrence.date() <= now.date() {
            // one-shots are consumed by materialization
            if def.kind() == ScheduleKind::Single {
                self.store.remove_schedule_item(feeder_id, def).await?;
                self.store.refresh_next_feed(feeder_id, now).await?;
            }
            let entry = NewQueueEntry {
                feeder_id,
                address: feeder.address,
                kind: def.kind().to_string(),
                fire_at: occurrence,
                count: def.count() as i32,
            };
            self.queue.enqueue(vec![entry]).await?;
        }

        Ok(inserted)
    }

    /// Remove a definition by structural match and refresh `next_feed`.
    /// Returns `false` when nothing matched.
    pub async fn remove_schedule(
        &self,
        feeder_id: i32,
        def: &ScheduleDef,
        now: NaiveDateTime,
    ) -> Result<bool, ScheduleError> {
        if self.store.get_feeder(feeder_id).await?.is_none() {
            return Err(ScheduleError::NotFound(feeder_id));
        }
        let removed = self.store.remove_schedule_item(feeder_id, def).await?;
        self.store.refresh_next_feed(feeder_id, now).await?;
        Ok(removed)
    }

    /// Build queue entries for every definition of this feeder whose
    /// next occurrence falls today or earlier. Entries are returned, not
    /// persisted; handing them to the queue is the caller's job.
    /// Qualifying one-shot (Single) definitions are deleted from the
    /// feeder so they never recur.
    pub async fn materialize_today(
        &self,
        feeder_id: i32,
        now: NaiveDateTime,
    ) -> Result<Vec<NewQueueEntry>, ScheduleError> {
        let feeder = self
            .store
            .get_feeder(feeder_id)
            .await?
            .ok_or(ScheduleError::NotFound(feeder_id))?;

        let items = self.store.list_schedule_items(feeder_id).await?;
        let mut entries = Vec::new();
        let mut removed_single = false;
        for item in items {
            let def = ScheduleDef::from_canonical(&item.canonical)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let occurrence = next_occurrence(&def, now);
            if occurrence.date() > now.date() {
                continue;
            }
            if def.kind() == ScheduleKind::Single {
                self.store.delete_schedule_item_by_id(item.id).await?;
                removed_single = true;
            }
            entries.push(NewQueueEntry {
                feeder_id,
                address: feeder.address.clone(),
                kind: item.kind,
                fire_at: occurrence,
                count: def.count() as i32,
            });
        }
        if removed_single {
            self.store.refresh_next_feed(feeder_id, now).await?;
        }
        debug!(feeder_id, due = entries.len(), "materialized today's occurrences");
        Ok(entries)
    }

    /// Minimum next occurrence across the feeder's definitions, or None
    /// when it has no schedule.
    pub async fn next_feed_time(
        &self,
        feeder_id: i32,
        now: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, ScheduleError> {
        if self.store.get_feeder(feeder_id).await?.is_none() {
            return Err(ScheduleError::NotFound(feeder_id));
        }
        Ok(self.store.refresh_next_feed(feeder_id, now).await?)
    }
}
