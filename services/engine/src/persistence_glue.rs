//! The two write-through paths that depend on decoded/enriched session
//! state rather than a raw relay payload (C10's remainder; the relay hub
//! already handles session rows, x2 passings/loops, flag-log, and
//! competitor-metadata upserts directly from its ingress handler).

use std::sync::Arc;

use enrichers::LapCompletionEvent;
use session_state::{CarPosition, SessionState};
use tracing::warn;

use crate::state::EventEngine;

pub async fn record_lap(engine: &Arc<EventEngine>, session_id: i64, car: &CarPosition, event: &LapCompletionEvent) {
    let snapshot = match serde_json::to_value(car) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to serialize car snapshot for lap log");
            return;
        }
    };
    if let Err(e) = persistence::repo::car_lap_logs::insert(
        &engine.pool,
        engine.event_id,
        session_id,
        &event.number,
        event.lap_number,
        event.lap_time_ms,
        event.total_time_ms,
        event.lap_included_pit,
        &snapshot,
    )
    .await
    {
        warn!(error = %e, number = %event.number, "failed to persist lap log, in-memory state remains authoritative");
    }
}

/// Archives the final snapshot when a session ends. Retried opportunistically
/// by the caller on the next session-end trigger if it fails; the in-memory
/// state isn't lost either way since liveness already moved to `Ended`.
pub async fn archive_session_results(engine: &Arc<EventEngine>, state: &SessionState) {
    let payload = match serde_json::to_value(crate::publisher::full_status_payload(state)) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to serialize full status payload for archival");
            return;
        }
    };
    let session_state = match serde_json::to_value(state) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to serialize session state for archival");
            return;
        }
    };
    if let Err(e) = persistence::repo::session_results::upsert(&engine.pool, engine.event_id, state.session_id, &payload, &session_state).await {
        warn!(error = %e, session_id = state.session_id, "failed to archive session results");
    }
}
