pub mod models;
pub mod schema;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    Feeder, FeedingLog, HourlyConsumption, NewFeeder, NewFeedingLog, NewHourlyConsumption,
    NewQueueEntry, NewScheduleItem, QueueEntry, ScheduleItem,
};
use smartfeeder_shared::domain::{FeederSeed, ScheduleDef};
use smartfeeder_shared::schedule::next_occurrence;
use tracing::trace;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored schedule definition no longer decodes.
    #[error("corrupt schedule definition: {0}")]
    Corrupt(String),
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Upsert the configured feeder fleet. New feeders start with status
    /// OK, no feed history and an empty schedule; re-seeding an existing
    /// product key refreshes its address and credential hash only.
    pub async fn seed_feeders(&self, seeds: &[FeederSeed]) -> Result<(), StorageError> {
        use schema::feeders;

        let pool = self.pool.clone();
        let seeds_owned = seeds.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            for s in &seeds_owned {
                let new_feeder = NewFeeder {
                    product_key: &s.product_key,
                    password_hash: &s.password_hash,
                    address: &s.address,
                    status: "OK",
                };
                diesel::insert_into(feeders::table)
                    .values(&new_feeder)
                    .on_conflict(feeders::product_key)
                    .do_update()
                    .set((
                        feeders::password_hash.eq(new_feeder.password_hash),
                        feeders::address.eq(new_feeder.address),
                    ))
                    .execute(&mut conn)?;
            }
            Ok(())
        })
        .await?
    }

    pub async fn get_feeder(&self, feeder_id: i32) -> Result<Option<Feeder>, StorageError> {
        use schema::feeders::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Feeder>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(feeders
                .filter(id.eq(feeder_id))
                .first::<Feeder>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn get_feeder_by_product_key(
        &self,
        key: &str,
    ) -> Result<Option<Feeder>, StorageError> {
        use schema::feeders::dsl::*;
        let pool = self.pool.clone();
        let key_owned = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Feeder>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(feeders
                .filter(product_key.eq(&key_owned))
                .first::<Feeder>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn list_feeders(&self) -> Result<Vec<Feeder>, StorageError> {
        use schema::feeders::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Feeder>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(feeders.order(id.asc()).load::<Feeder>(&mut conn)?)
        })
        .await?
    }

    pub async fn set_feeder_status(
        &self,
        feeder_id: i32,
        new_status: &str,
    ) -> Result<bool, StorageError> {
        use schema::feeders::dsl::*;
        let pool = self.pool.clone();
        let status_owned = new_status.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let updated = diesel::update(feeders.filter(id.eq(feeder_id)))
                .set(status.eq(&status_owned))
                .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }

    /// Insert a schedule definition into a feeder's set. Returns `false`
    /// when a structurally identical definition is already present
    /// (duplicate insert is a no-op, not an error).
    pub async fn add_schedule_item(
        &self,
        feeder_id: i32,
        def: &ScheduleDef,
    ) -> Result<bool, StorageError> {
        use schema::schedule_items;
        let pool = self.pool.clone();
        let kind = def.kind().to_string();
        let canonical = def.canonical();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewScheduleItem {
                feeder_id,
                kind: &kind,
                canonical: &canonical,
            };
            let inserted = diesel::insert_into(schedule_items::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(inserted > 0)
        })
        .await?
    }

    /// Remove a definition by structural match. Time-of-day seconds were
    /// already truncated when the definition was built, so canonical
    /// equality is the whole matching rule.
    pub async fn remove_schedule_item(
        &self,
        feeder_id: i32,
        def: &ScheduleDef,
    ) -> Result<bool, StorageError> {
        use schema::schedule_items::dsl as si;
        let pool = self.pool.clone();
        let canonical_owned = def.canonical();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(
                si::schedule_items
                    .filter(si::feeder_id.eq(feeder_id))
                    .filter(si::canonical.eq(&canonical_owned)),
            )
            .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    pub async fn delete_schedule_item_by_id(&self, item_id: i32) -> Result<bool, StorageError> {
        use schema::schedule_items::dsl as si;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(si::schedule_items.filter(si::id.eq(item_id)))
                .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    pub async fn list_schedule_items(
        &self,
        feeder_id: i32,
    ) -> Result<Vec<ScheduleItem>, StorageError> {
        use schema::schedule_items::dsl as si;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ScheduleItem>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(si::schedule_items
                .filter(si::feeder_id.eq(feeder_id))
                .order(si::id.asc())
                .load::<ScheduleItem>(&mut conn)?)
        })
        .await?
    }

    /// Recompute the feeder's cached `next_feed` as the minimum next
    /// occurrence over its definitions (NULL when it has none) and
    /// persist it. Returns the computed value.
    pub async fn refresh_next_feed(
        &self,
        feeder_id: i32,
        now: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<NaiveDateTime>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let next = compute_next_feed(&mut conn, feeder_id, now)?;
            diesel::update(schema::feeders::table.filter(schema::feeders::id.eq(feeder_id)))
                .set(schema::feeders::next_feed.eq(next))
                .execute(&mut conn)?;
            Ok(next)
        })
        .await?
    }

    pub async fn insert_queue_entries(
        &self,
        entries: Vec<NewQueueEntry>,
    ) -> Result<usize, StorageError> {
        use schema::queue_entries;
        if entries.is_empty() {
            return Ok(0);
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let inserted = diesel::insert_into(queue_entries::table)
                .values(&entries)
                .execute(&mut conn)?;
            trace!(inserted, "queue entries inserted");
            Ok(inserted)
        })
        .await?
    }

    /// Entries for one feeder with `fire_at <= as_of`, in arrival order.
    pub async fn due_queue_entries_for_feeder(
        &self,
        feeder_id: i32,
        as_of: NaiveDateTime,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        use schema::queue_entries::dsl as qe;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<QueueEntry>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(qe::queue_entries
                .filter(qe::feeder_id.eq(feeder_id))
                .filter(qe::fire_at.le(as_of))
                .order(qe::id.asc())
                .load::<QueueEntry>(&mut conn)?)
        })
        .await?
    }

    /// All globally due entries, used by the periodic safety-net sweep.
    pub async fn due_queue_entries(
        &self,
        as_of: NaiveDateTime,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        use schema::queue_entries::dsl as qe;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<QueueEntry>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(qe::queue_entries
                .filter(qe::fire_at.le(as_of))
                .order(qe::id.asc())
                .load::<QueueEntry>(&mut conn)?)
        })
        .await?
    }

    /// Settle one queue entry: append a feeding log row with `outcome`,
    /// refresh the feeder's `last_feed`/`next_feed`, and delete the
    /// entry, all inside one immediate (write-locking) transaction.
    ///
    /// Returns `false` when the entry was already gone: a competing
    /// drain (device poll vs. sweep) won the race, and this call is a
    /// no-op rather than an error, which is what makes the two drain
    /// paths safe to run concurrently.
    pub async fn acknowledge_entry(
        &self,
        entry_id: i32,
        outcome: &str,
        at: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::{feeders, feeding_logs, queue_entries};
        let pool = self.pool.clone();
        let outcome_owned = outcome.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let entry: Option<QueueEntry> = queue_entries::table
                    .filter(queue_entries::id.eq(entry_id))
                    .first::<QueueEntry>(conn)
                    .optional()?;
                let Some(entry) = entry else {
                    return Ok(false);
                };
                diesel::delete(queue_entries::table.filter(queue_entries::id.eq(entry_id)))
                    .execute(conn)?;
                let log = NewFeedingLog {
                    feeder_id: entry.feeder_id,
                    kind: &entry.kind,
                    fed_at: at,
                    amount: entry.count,
                    status: &outcome_owned,
                };
                diesel::insert_into(feeding_logs::table)
                    .values(&log)
                    .execute(conn)?;
                let next = compute_next_feed(conn, entry.feeder_id, at)?;
                diesel::update(feeders::table.filter(feeders::id.eq(entry.feeder_id)))
                    .set((feeders::last_feed.eq(Some(at)), feeders::next_feed.eq(next)))
                    .execute(conn)?;
                Ok(true)
            })
        })
        .await?
    }

    /// Additive upsert into the per-hour consumption bucket.
    pub async fn add_consumption(
        &self,
        feeder_id: i32,
        hour: NaiveDateTime,
        amount: i32,
    ) -> Result<(), StorageError> {
        use schema::hourly_consumption::dsl as hc;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewHourlyConsumption {
                feeder_id,
                hour,
                food_eaten: amount,
            };
            diesel::insert_into(hc::hourly_consumption)
                .values(&row)
                .on_conflict((hc::feeder_id, hc::hour))
                .do_update()
                .set(hc::food_eaten.eq(hc::food_eaten + amount))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn consumption_between(
        &self,
        feeder_id: i32,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<HourlyConsumption>, StorageError> {
        use schema::hourly_consumption::dsl as hc;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<HourlyConsumption>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(hc::hourly_consumption
                .filter(hc::feeder_id.eq(feeder_id))
                .filter(hc::hour.ge(from))
                .filter(hc::hour.le(to))
                .order(hc::hour.asc())
                .load::<HourlyConsumption>(&mut conn)?)
        })
        .await?
    }

    pub async fn feeding_logs_for(
        &self,
        feeder_id: i32,
        limit: i64,
    ) -> Result<Vec<FeedingLog>, StorageError> {
        use schema::feeding_logs::dsl as fl;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<FeedingLog>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(fl::feeding_logs
                .filter(fl::feeder_id.eq(feeder_id))
                .order(fl::fed_at.desc())
                .limit(limit)
                .load::<FeedingLog>(&mut conn)?)
        })
        .await?
    }
}

/// Truncate a timestamp to the start of its hour, the bucket key for
/// consumption accounting.
pub fn hour_bucket(t: NaiveDateTime) -> NaiveDateTime {
    use chrono::Timelike;
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Minimum next occurrence over a feeder's definitions, or None when the
/// feeder has no schedule.
fn compute_next_feed(
    conn: &mut SqliteConnection,
    feeder: i32,
    now: NaiveDateTime,
) -> Result<Option<NaiveDateTime>, StorageError> {
    use schema::schedule_items::dsl as si;
    let canonicals: Vec<String> = si::schedule_items
        .filter(si::feeder_id.eq(feeder))
        .select(si::canonical)
        .load::<String>(conn)?;
    let mut next: Option<NaiveDateTime> = None;
    for canonical in canonicals {
        let def = ScheduleDef::from_canonical(&canonical)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let occ = next_occurrence(&def, now);
        next = Some(match next {
            Some(cur) => cur.min(occ),
            None => occ,
        });
    }
    Ok(next)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
