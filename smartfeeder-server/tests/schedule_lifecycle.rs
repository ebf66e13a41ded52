use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use smartfeeder_server::queue::EventQueue;
use smartfeeder_server::schedule::ScheduleService;
use smartfeeder_server::storage::models::NewQueueEntry;
use smartfeeder_server::storage::Store;
use smartfeeder_shared::domain::{FeederSeed, FeederStatus, IntervalUnit, ScheduleDef};

struct Fixture {
    store: Store,
    queue: EventQueue,
    schedule: ScheduleService,
    feeder_id: i32,
    _tempdir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let store = Store::connect_sqlite(db_path.to_str().unwrap())
        .await
        .expect("db");
    store
        .seed_feeders(&[FeederSeed {
            product_key: "fixture-key".into(),
            password_hash: "$2b$04$invalidhashforfixtureonly0000000000000000000000000000".into(),
            address: "10.1.2.3".into(),
        }])
        .await
        .expect("seed");
    let feeder_id = store
        .get_feeder_by_product_key("fixture-key")
        .await
        .unwrap()
        .unwrap()
        .id;
    let queue = EventQueue::new(store.clone());
    let schedule = ScheduleService::new(store.clone(), queue.clone());
    Fixture {
        store,
        queue,
        schedule,
        feeder_id,
        _tempdir: dir,
    }
}

fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

#[tokio::test]
async fn acknowledge_is_at_most_once() {
    let fx = fixture().await;
    let now = dt(2026, 3, 10, 9, 0);

    fx.queue
        .enqueue(vec![NewQueueEntry {
            feeder_id: fx.feeder_id,
            address: "10.1.2.3".into(),
            kind: "S".into(),
            fire_at: now - Duration::minutes(1),
            count: 2,
        }])
        .await
        .unwrap();
    let due = fx.queue.due_entries_for(fx.feeder_id, now).await.unwrap();
    assert_eq!(due.len(), 1);
    let entry_id = due[0].id;

    // two concurrent settlements of the same entry
    let (a, b) = tokio::join!(
        fx.queue.acknowledge(entry_id, FeederStatus::Ok, now),
        fx.queue.acknowledge(entry_id, FeederStatus::Ok, now),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one settlement must win, got {a} and {b}");

    let logs = fx.store.feeding_logs_for(fx.feeder_id, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].amount, 2);
    assert_eq!(logs[0].status, "OK");

    assert!(
        fx.queue
            .due_entries_for(fx.feeder_id, now)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn acknowledge_refreshes_feed_times() {
    let fx = fixture().await;
    let now = dt(2026, 3, 10, 9, 0);

    // daily at 10:00, added at 09:00: fires later today
    let daily = ScheduleDef::recurring(
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        1,
        IntervalUnit::Days,
        1,
    )
    .unwrap();
    fx.schedule
        .add_schedule(fx.feeder_id, &daily, now)
        .await
        .unwrap();

    // not due yet at 09:00
    assert!(fx.queue.due_entries_for(fx.feeder_id, now).await.unwrap().is_empty());

    let later = dt(2026, 3, 10, 10, 30);
    let due = fx.queue.due_entries_for(fx.feeder_id, later).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].fire_at, dt(2026, 3, 10, 10, 0));
    assert!(
        fx.queue
            .acknowledge(due[0].id, FeederStatus::Ok, later)
            .await
            .unwrap()
    );

    let feeder = fx.store.get_feeder(fx.feeder_id).await.unwrap().unwrap();
    assert_eq!(feeder.last_feed, Some(later));
    assert_eq!(feeder.next_feed, Some(dt(2026, 3, 11, 10, 0)));
}

#[tokio::test]
async fn materialization_consumes_single_shots() {
    let fx = fixture().await;
    let now = dt(2026, 3, 10, 9, 0);

    let single = ScheduleDef::single(dt(2026, 3, 10, 18, 0), 4).unwrap();
    let weekly_future = ScheduleDef::weekly(
        NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        // 2026-03-10 is a Tuesday; Friday is days away
        &[4],
        1,
    )
    .unwrap();

    // insert directly so add_schedule's own materialization stays out of
    // the picture
    fx.store
        .add_schedule_item(fx.feeder_id, &single)
        .await
        .unwrap();
    fx.store
        .add_schedule_item(fx.feeder_id, &weekly_future)
        .await
        .unwrap();

    let entries = fx
        .schedule
        .materialize_today(fx.feeder_id, now)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, "S");
    assert_eq!(entries[0].fire_at, dt(2026, 3, 10, 18, 0));
    assert_eq!(entries[0].count, 4);

    // the one-shot is gone; the weekly stays
    let items = fx.store.list_schedule_items(fx.feeder_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, "W");

    // a second pass finds nothing new
    let entries = fx
        .schedule
        .materialize_today(fx.feeder_id, now)
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn next_feed_is_minimum_over_definitions() {
    let fx = fixture().await;
    let now = dt(2026, 3, 10, 9, 0);

    let evening = ScheduleDef::recurring(
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        1,
        IntervalUnit::Days,
        1,
    )
    .unwrap();
    let noon_single = ScheduleDef::single(dt(2026, 3, 10, 12, 0), 1).unwrap();

    fx.schedule
        .add_schedule(fx.feeder_id, &evening, now)
        .await
        .unwrap();
    fx.schedule
        .add_schedule(fx.feeder_id, &noon_single, now)
        .await
        .unwrap();

    // the single was consumed at add time (it falls today), so only the
    // evening definition remains for next_feed
    let next = fx
        .schedule
        .next_feed_time(fx.feeder_id, now)
        .await
        .unwrap();
    assert_eq!(next, Some(dt(2026, 3, 10, 20, 0)));

    // but its queue entry exists alongside the evening one
    let due = fx
        .queue
        .due_entries_for(fx.feeder_id, dt(2026, 3, 10, 23, 59))
        .await
        .unwrap();
    assert_eq!(due.len(), 2);
}

#[tokio::test]
async fn enqueue_drops_incomplete_entries() {
    let fx = fixture().await;
    let now = dt(2026, 3, 10, 9, 0);

    let inserted = fx
        .queue
        .enqueue(vec![
            NewQueueEntry {
                feeder_id: fx.feeder_id,
                address: String::new(),
                kind: "S".into(),
                fire_at: now,
                count: 1,
            },
            NewQueueEntry {
                feeder_id: fx.feeder_id,
                address: "10.1.2.3".into(),
                kind: "S".into(),
                fire_at: now,
                count: 0,
            },
            NewQueueEntry {
                feeder_id: fx.feeder_id,
                address: "10.1.2.3".into(),
                kind: "S".into(),
                fire_at: now,
                count: 3,
            },
        ])
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let due = fx.queue.due_entries_for(fx.feeder_id, now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].count, 3);
}

#[tokio::test]
async fn remove_schedule_clears_next_feed() {
    let fx = fixture().await;
    let now = dt(2026, 3, 10, 9, 0);

    let daily = ScheduleDef::recurring(
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        1,
        IntervalUnit::Days,
        1,
    )
    .unwrap();
    fx.schedule
        .add_schedule(fx.feeder_id, &daily, now)
        .await
        .unwrap();
    assert!(
        fx.schedule
            .next_feed_time(fx.feeder_id, now)
            .await
            .unwrap()
            .is_some()
    );

    assert!(
        fx.schedule
            .remove_schedule(fx.feeder_id, &daily, now)
            .await
            .unwrap()
    );
    // removing again is a no-op
    assert!(
        !fx.schedule
            .remove_schedule(fx.feeder_id, &daily, now)
            .await
            .unwrap()
    );
    assert_eq!(
        fx.schedule.next_feed_time(fx.feeder_id, now).await.unwrap(),
        None
    );
}
