mod config;
pub mod dispatch;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
pub use config::AppConfig;
use serde::{Deserialize, Serialize};
use smartfeeder_shared::domain::{IntervalUnit, ScheduleDef};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info_span;
use uuid::Uuid;

use crate::queue::EventQueue;
use crate::schedule::{ScheduleError, ScheduleService};
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub schedule: ScheduleService,
    pub queue: EventQueue,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        let queue = EventQueue::new(store.clone());
        let schedule = ScheduleService::new(store.clone(), queue.clone());
        Self {
            config,
            store,
            schedule,
            queue,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/healthz", get(health))
        .route("/device/poll", post(dispatch::device_poll))
        .route("/api/feeders", get(api_list_feeders))
        .route("/api/feeders/{id}", get(api_get_feeder))
        .route("/api/feeders/{id}/schedule", post(api_add_schedule))
        .route("/api/feeders/{id}/schedule", delete(api_remove_schedule))
        .route("/api/feeders/{id}/logs", get(api_feeding_logs))
        .route("/api/feeders/{id}/consumption", get(api_consumption))
        .with_state(state)
        .layer(trace)
        .layer(middleware::from_fn(add_request_id))
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

// -- Management API ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct FeederDto {
    pub id: i32,
    pub product_key: String,
    pub address: String,
    pub status: String,
    pub last_feed: Option<NaiveDateTime>,
    pub next_feed: Option<NaiveDateTime>,
}

impl From<crate::storage::models::Feeder> for FeederDto {
    fn from(f: crate::storage::models::Feeder) -> Self {
        // password hash deliberately not exposed
        FeederDto {
            id: f.id,
            product_key: f.product_key,
            address: f.address,
            status: f.status,
            last_feed: f.last_feed,
            next_feed: f.next_feed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeederDetailDto {
    #[serde(flatten)]
    pub feeder: FeederDto,
    pub schedule: Vec<ScheduleDef>,
}

/// Wire form of a schedule definition on the management API. `type` is
/// the single-letter discriminant; the other fields are required or
/// forbidden depending on it, which `into_def` checks.
#[derive(Debug, Deserialize)]
pub struct ScheduleItemReq {
    #[serde(rename = "type")]
    pub kind: String,
    /// "HH:MM" for recurring/weekly, "YYYY-MM-DDTHH:MM[:SS]" for single.
    pub time: Option<String>,
    pub every: Option<u32>,
    pub unit: Option<String>,
    pub days: Option<Vec<u8>>,
    pub count: Option<u32>,
}

impl ScheduleItemReq {
    fn into_def(self) -> Result<ScheduleDef, AppError> {
        let count = self.count.unwrap_or(1);
        let bad = |msg: &str| AppError::bad_request(msg.to_string());
        match self.kind.as_str() {
            "R" => {
                let time = parse_time_of_day(
                    self.time.as_deref().ok_or_else(|| bad("time required"))?,
                )?;
                let every = self.every.ok_or_else(|| bad("every required"))?;
                let unit: IntervalUnit = self
                    .unit
                    .as_deref()
                    .ok_or_else(|| bad("unit required"))?
                    .parse()
                    .map_err(AppError::bad_request)?;
                ScheduleDef::recurring(time, every, unit, count).map_err(AppError::bad_request)
            }
            "W" => {
                let time = parse_time_of_day(
                    self.time.as_deref().ok_or_else(|| bad("time required"))?,
                )?;
                let days = self.days.ok_or_else(|| bad("days required"))?;
                ScheduleDef::weekly(time, &days, count).map_err(AppError::bad_request)
            }
            "S" => {
                let at = parse_timestamp(
                    self.time.as_deref().ok_or_else(|| bad("time required"))?,
                )?;
                ScheduleDef::single(at, count).map_err(AppError::bad_request)
            }
            other => Err(bad(&format!("unknown schedule type: {other:?}"))),
        }
    }
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| AppError::bad_request(format!("invalid time of day: {s:?}")))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, AppError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .map_err(|_| AppError::bad_request(format!("invalid timestamp: {s:?}")))
}

#[derive(Debug, Serialize)]
pub struct ScheduleChangeResp {
    pub changed: bool,
    pub next_feed: Option<NaiveDateTime>,
}

async fn api_list_feeders(State(state): State<AppState>) -> Result<Json<Vec<FeederDto>>, AppError> {
    let rows = state.store.list_feeders().await.map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(FeederDto::from).collect()))
}

async fn api_get_feeder(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<FeederDetailDto>, AppError> {
    let feeder = state
        .store
        .get_feeder(id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("feeder not found: {}", id)))?;
    let items = state
        .store
        .list_schedule_items(id)
        .await
        .map_err(AppError::internal)?;
    let mut schedule = Vec::with_capacity(items.len());
    for item in items {
        let def = ScheduleDef::from_canonical(&item.canonical).map_err(AppError::internal)?;
        schedule.push(def);
    }
    Ok(Json(FeederDetailDto {
        feeder: FeederDto::from(feeder),
        schedule,
    }))
}

async fn api_add_schedule(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<ScheduleItemReq>,
) -> Result<Json<ScheduleChangeResp>, AppError> {
    let def = body.into_def()?;
    let now = Local::now().naive_local();
    let changed = state.schedule.add_schedule(id, &def, now).await?;
    let next_feed = state.schedule.next_feed_time(id, now).await?;
    Ok(Json(ScheduleChangeResp { changed, next_feed }))
}

async fn api_remove_schedule(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<ScheduleItemReq>,
) -> Result<Json<ScheduleChangeResp>, AppError> {
    let def = body.into_def()?;
    let now = Local::now().naive_local();
    let changed = state.schedule.remove_schedule(id, &def, now).await?;
    let next_feed = state.schedule.next_feed_time(id, now).await?;
    Ok(Json(ScheduleChangeResp { changed, next_feed }))
}

#[derive(Debug, Deserialize)]
struct LogOpts {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FeedingLogDto {
    pub time: NaiveDateTime,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: i32,
    pub status: String,
}

async fn api_feeding_logs(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(opts): Query<LogOpts>,
) -> Result<Json<Vec<FeedingLogDto>>, AppError> {
    ensure_feeder_exists(&state, id).await?;
    let limit = opts.limit.unwrap_or(30).clamp(1, 1000);
    let rows = state
        .store
        .feeding_logs_for(id, limit)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(|l| FeedingLogDto {
            time: l.fed_at,
            kind: l.kind,
            amount: l.amount,
            status: l.status,
        })
        .collect();
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct ConsumptionOpts {
    /// "YYYY-MM-DDTHH:MM[:SS]"; defaults to 30 days ago.
    from: Option<String>,
    /// Defaults to now.
    to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConsumptionDto {
    pub hour: NaiveDateTime,
    pub food_eaten: i32,
}

async fn api_consumption(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(opts): Query<ConsumptionOpts>,
) -> Result<Json<Vec<ConsumptionDto>>, AppError> {
    ensure_feeder_exists(&state, id).await?;
    let now = Local::now().naive_local();
    let from = match opts.from.as_deref() {
        Some(s) => parse_timestamp(s)?,
        None => now - Duration::days(30),
    };
    let to = match opts.to.as_deref() {
        Some(s) => parse_timestamp(s)?,
        None => now,
    };
    let rows = state
        .store
        .consumption_between(id, from, to)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(|c| ConsumptionDto {
            hour: c.hour,
            food_eaten: c.food_eaten,
        })
        .collect();
    Ok(Json(items))
}

async fn ensure_feeder_exists(state: &AppState, id: i32) -> Result<(), AppError> {
    state
        .store
        .get_feeder(id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("feeder not found: {}", id)))?;
    Ok(())
}

// -- Errors -----------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: std::fmt::Display>(msg: T) -> Self {
        Self::BadRequest(msg.to_string())
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::NotFound(id) => AppError::not_found(format!("feeder not found: {id}")),
            ScheduleError::Invalid(v) => AppError::bad_request(v),
            ScheduleError::Storage(s) => AppError::internal(s),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
