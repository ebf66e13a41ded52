//! Device-facing dispatch endpoint.
//!
//! Feeders poll `POST /device/poll` with the ASCII wire payload from
//! `smartfeeder_shared::wire` and get one of four directives back. The
//! handler is stateless across polls; every rejection (bad payload,
//! missing keys, unknown product key, wrong credential) is the same
//! empty body so the wire never reveals which check failed.

use axum::body::Bytes;
use axum::extract::State;
use chrono::{Local, NaiveDateTime};
use smartfeeder_shared::domain::FeederStatus;
use smartfeeder_shared::wire::{PollRequest, PollReply};
use tracing::{debug, error};

use super::AppState;
use crate::storage::hour_bucket;

pub async fn device_poll(State(state): State<AppState>, body: Bytes) -> String {
    let now = Local::now().naive_local();
    let reply = handle_poll(&state, &body, now).await;
    debug!(reply = ?reply, "poll handled");
    reply.as_str().to_string()
}

async fn handle_poll(state: &AppState, payload: &[u8], now: NaiveDateTime) -> PollReply {
    let req = match PollRequest::parse(payload) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "poll: unparseable payload");
            return PollReply::Rejected;
        }
    };

    let (Some(product_key), Some(credential)) =
        (req.product_key.as_deref(), req.credential.as_deref())
    else {
        return PollReply::Rejected;
    };

    let feeder = match state.store.get_feeder_by_product_key(product_key).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            debug!("poll: unknown product key");
            return PollReply::Rejected;
        }
        Err(e) => {
            error!(error = %e, "poll: feeder lookup failed");
            return PollReply::Rejected;
        }
    };

    // Salted-hash comparison; bcrypt's check is constant-time over the
    // digest.
    match bcrypt::verify(credential, &feeder.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            debug!(feeder = feeder.id, "poll: credential mismatch");
            return PollReply::Rejected;
        }
        Err(e) => {
            error!(feeder = feeder.id, error = %e, "poll: credential verify failed");
            return PollReply::Rejected;
        }
    }

    if let Some(drop_result) = req.drop_result.as_deref() {
        let status = if drop_result == "1" {
            FeederStatus::Fail
        } else {
            FeederStatus::Ok
        };
        if let Err(e) = state
            .store
            .set_feeder_status(feeder.id, &status.to_string())
            .await
        {
            error!(feeder = feeder.id, error = %e, "poll: status update failed");
            return PollReply::Rejected;
        }
        // A drop report deliberately does not consult the queue: the
        // device is mid-cycle and will poll again on its own.
        return PollReply::StatusUpdated;
    }

    if let Some(raw) = req.food_eaten.as_deref() {
        let Ok(amount) = raw.parse::<i32>() else {
            debug!(feeder = feeder.id, raw, "poll: food amount not an integer");
            return PollReply::Rejected;
        };
        if let Err(e) = state
            .store
            .add_consumption(feeder.id, hour_bucket(now), amount)
            .await
        {
            error!(feeder = feeder.id, error = %e, "poll: consumption log failed");
            return PollReply::Rejected;
        }
    }

    let due = match state.queue.due_entries_for(feeder.id, now).await {
        Ok(d) => d,
        Err(e) => {
            error!(feeder = feeder.id, error = %e, "poll: queue read failed");
            return PollReply::Rejected;
        }
    };
    if due.is_empty() {
        return PollReply::Nothing;
    }
    for entry in due {
        // Optimistically logged OK: the device's next poll carries the
        // real outcome in `d`, which updates feeder status but never
        // amends this row.
        match state.queue.acknowledge(entry.id, FeederStatus::Ok, now).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(entry = entry.id, "poll: entry already drained by sweep");
            }
            Err(e) => {
                error!(entry = entry.id, error = %e, "poll: acknowledge failed");
                return PollReply::Rejected;
            }
        }
    }
    PollReply::Drop
}
