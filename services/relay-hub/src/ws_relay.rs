use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use persistence::repo::{competitor_metadata, flag_log, sessions, x2};
use serde_json::json;
use stream_bus::keys::{self, FeedKind};
use timing_protocol::{error_codes, ErrorMessage, RelayMessage};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{extract_bearer, validate_token};
use crate::state::AppState;

const PASSING_BATCH_SIZE: usize = 25;

pub async fn ws_relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(ToOwned::to_owned);
    ws.on_upgrade(move |socket| handle_relay_socket(socket, state, token))
}

async fn send_ws_error(socket: &mut WebSocket, code: &str, message: &str, retryable: bool) {
    let err = ErrorMessage {
        code: code.to_owned(),
        message: message.to_owned(),
        retryable,
    };
    if let Ok(json) = serde_json::to_string(&err) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
}

async fn handle_relay_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let token_str = match token {
        Some(t) => t,
        None => {
            send_ws_error(&mut socket, error_codes::INVALID_TOKEN, "missing Authorization header", false).await;
            return;
        }
    };
    let claims = match validate_token(&state.pool, &token_str).await {
        Some(c) => c,
        None => {
            send_ws_error(&mut socket, error_codes::INVALID_TOKEN, "unknown or revoked token", false).await;
            return;
        }
    };
    state.cache_org(&claims.client_id, claims.org_id).await;

    let connection_id = Uuid::new_v4().to_string();
    let connected_at = Utc::now();
    let record = json!({
        "connectionId": connection_id,
        "clientId": claims.client_id,
        "orgId": claims.org_id,
        "connectedAt": connected_at,
    });
    if let Err(e) = state
        .bus
        .hset(keys::status_connections(), &keys::relay_connection(&connection_id), &record.to_string())
        .await
    {
        warn!(error = %e, "failed to register relay connection");
    }
    info!(client_id = %claims.client_id, connection_id = %connection_id, "relay connected");

    loop {
        let msg = match socket.recv().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(data))) => {
                let _ = socket.send(Message::Pong(data)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "relay websocket error");
                break;
            }
        };

        let parsed: RelayMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                pipeline_metrics::increment_decode_error("relay_ws");
                send_ws_error(&mut socket, error_codes::PROTOCOL_ERROR, &format!("invalid JSON: {e}"), false).await;
                continue;
            }
        };

        if let Err(e) = dispatch(&state, &claims, &connection_id, parsed).await {
            warn!(error = %e, "error handling relay message");
        }
    }

    state.leave_all_relay_groups(&connection_id).await;
    let _ = state.bus.hdel(keys::status_connections(), &keys::relay_connection(&connection_id)).await;
    info!(connection_id = %connection_id, "relay disconnected");
}

async fn dispatch(
    state: &AppState,
    claims: &crate::auth::ClientClaims,
    connection_id: &str,
    message: RelayMessage,
) -> Result<(), stream_bus::BusError> {
    match message {
        RelayMessage::SendHeartbeat { event_id } => {
            let payload = json!({
                "eventId": event_id,
                "connectionId": connection_id,
                "orgId": claims.org_id,
                "timestamp": Utc::now(),
            });
            state
                .bus
                .hset(keys::relay_event_connections(), &keys::relay_heartbeat(event_id), &payload.to_string())
                .await?;
        }
        RelayMessage::SendRMonitor { event_id, session_id, command } => {
            if !authorized(state, claims.org_id, event_id).await {
                return Ok(());
            }
            state.join_relay_group(event_id, connection_id).await;
            let tag = keys::field_tag(FeedKind::RMonitor, event_id, session_id);
            state.bus.append(&keys::event_status_stream(event_id), &[(tag.as_str(), command.as_str())]).await?;
        }
        RelayMessage::SendSessionChange { event_id, session_id, session_name, time_zone_offset: _ } => {
            if !authorized(state, claims.org_id, event_id).await {
                return Ok(());
            }
            state.join_relay_group(event_id, connection_id).await;
            if let Err(e) = sessions::create_session(&state.pool, event_id, &session_name).await {
                warn!(error = %e, "failed to persist session-change row");
            }
            let tag = keys::field_tag(FeedKind::SessionChanged, event_id, session_id);
            let value = json!({ "sessionId": session_id, "name": session_name }).to_string();
            state.bus.append(&keys::event_status_stream(event_id), &[(tag.as_str(), value.as_str())]).await?;
        }
        RelayMessage::SendPassings { event_id, session_id, passings } => {
            if !authorized(state, claims.org_id, event_id).await {
                return Ok(());
            }
            state.join_relay_group(event_id, connection_id).await;
            let tag = keys::field_tag(FeedKind::X2Pass, event_id, session_id);
            for chunk in passings.chunks(PASSING_BATCH_SIZE) {
                let value = serde_json::to_string(chunk)?;
                state.bus.append(&keys::event_status_stream(event_id), &[(tag.as_str(), value.as_str())]).await?;
            }
            for passing in &passings {
                if let Err(e) = x2::insert_passing(
                    &state.pool,
                    event_id,
                    session_id,
                    &passing.transponder_id,
                    passing.is_in_pit,
                    passing.timestamp,
                )
                .await
                {
                    warn!(error = %e, "failed to persist x2 passing");
                }
            }
        }
        RelayMessage::SendLoopChange { event_id, loops } => {
            if !authorized(state, claims.org_id, event_id).await {
                return Ok(());
            }
            state.join_relay_group(event_id, connection_id).await;
            let tag = keys::field_tag(FeedKind::X2Loops, event_id, 0);
            let value = serde_json::to_string(&loops)?;
            state.bus.append(&keys::event_status_stream(event_id), &[(tag.as_str(), value.as_str())]).await?;
            for l in &loops {
                if let Err(e) = x2::upsert_loop(&state.pool, event_id, &l.name, l.is_in_pit, l.is_pit_start_finish).await {
                    warn!(error = %e, "failed to persist loop definition");
                }
            }
        }
        RelayMessage::SendFlags { event_id, session_id, flags } => {
            if !authorized(state, claims.org_id, event_id).await {
                return Ok(());
            }
            state.join_relay_group(event_id, connection_id).await;
            let tag = keys::field_tag(FeedKind::Flags, event_id, session_id);
            let value = serde_json::to_string(&flags)?;
            state.bus.append(&keys::event_status_stream(event_id), &[(tag.as_str(), value.as_str())]).await?;
            for flag in &flags {
                let flag_name = format!("{:?}", flag.flag);
                if let Some(end_time) = flag.end_time {
                    if let Err(e) = flag_log::close(&state.pool, event_id, session_id, &flag_name, flag.start_time, end_time).await {
                        warn!(error = %e, "failed to close flag-log entry");
                    }
                } else if let Err(e) = flag_log::upsert_open(&state.pool, event_id, session_id, &flag_name, flag.start_time).await {
                    warn!(error = %e, "failed to open flag-log entry");
                }
            }
        }
        RelayMessage::SendCompetitorMetadata { event_id, competitors } => {
            if !authorized(state, claims.org_id, event_id).await {
                return Ok(());
            }
            state.join_relay_group(event_id, connection_id).await;
            let tag = keys::field_tag(FeedKind::Competitors, event_id, 0);
            let value = serde_json::to_string(&competitors)?;
            state.bus.append(&keys::event_status_stream(event_id), &[(tag.as_str(), value.as_str())]).await?;
            for c in &competitors {
                if let Err(e) = competitor_metadata::upsert(
                    &state.pool,
                    event_id,
                    &c.car_number,
                    c.driver_name.as_deref(),
                    c.driver_id.as_deref(),
                )
                .await
                {
                    warn!(error = %e, "failed to persist competitor metadata");
                }
                let cache_key = keys::competitor_metadata(&c.car_number, event_id);
                let _ = state.bus.set_ex(&cache_key, c, 86_400).await;
            }
        }
    }
    Ok(())
}

/// The event must belong to the organization resolved from the connected
/// principal's client id. `claims.org_id` is already resolved once at
/// connect time; this only re-checks event ownership per message.
async fn authorized(state: &AppState, org_id: i64, event_id: i64) -> bool {
    persistence::repo::clients::event_belongs_to_org(&state.pool, event_id, org_id)
        .await
        .unwrap_or(false)
}
