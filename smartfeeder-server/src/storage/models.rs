use crate::storage::schema::{
    feeders, feeding_logs, hourly_consumption, queue_entries, schedule_items,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = feeders)]
pub struct Feeder {
    pub id: i32,
    pub product_key: String,
    pub password_hash: String,
    pub address: String,
    pub status: String,
    pub last_feed: Option<NaiveDateTime>,
    pub next_feed: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = feeders)]
pub struct NewFeeder<'a> {
    pub product_key: &'a str,
    pub password_hash: &'a str,
    pub address: &'a str,
    pub status: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = schedule_items)]
#[diesel(belongs_to(Feeder, foreign_key = feeder_id))]
pub struct ScheduleItem {
    pub id: i32,
    pub feeder_id: i32,
    pub kind: String,
    pub canonical: String,
}

#[derive(Insertable)]
#[diesel(table_name = schedule_items)]
pub struct NewScheduleItem<'a> {
    pub feeder_id: i32,
    pub kind: &'a str,
    pub canonical: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = queue_entries)]
#[diesel(belongs_to(Feeder, foreign_key = feeder_id))]
pub struct QueueEntry {
    pub id: i32,
    pub feeder_id: i32,
    pub address: String,
    pub kind: String,
    pub fire_at: NaiveDateTime,
    pub count: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = queue_entries)]
pub struct NewQueueEntry {
    pub feeder_id: i32,
    pub address: String,
    pub kind: String,
    pub fire_at: NaiveDateTime,
    pub count: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = feeding_logs)]
#[diesel(belongs_to(Feeder, foreign_key = feeder_id))]
pub struct FeedingLog {
    pub id: i32,
    pub feeder_id: i32,
    pub kind: String,
    pub fed_at: NaiveDateTime,
    pub amount: i32,
    pub status: String,
}

#[derive(Insertable)]
#[diesel(table_name = feeding_logs)]
pub struct NewFeedingLog<'a> {
    pub feeder_id: i32,
    pub kind: &'a str,
    pub fed_at: NaiveDateTime,
    pub amount: i32,
    pub status: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = hourly_consumption)]
pub struct HourlyConsumption {
    pub feeder_id: i32,
    pub hour: NaiveDateTime,
    pub food_eaten: i32,
}

#[derive(Insertable)]
#[diesel(table_name = hourly_consumption)]
pub struct NewHourlyConsumption {
    pub feeder_id: i32,
    pub hour: NaiveDateTime,
    pub food_eaten: i32,
}
