use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use stream_bus::keys;
use timing_protocol::{error_codes, ClientMessage, ErrorMessage, ServerMessage};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{extract_bearer, validate_token};
use crate::state::{AppState, ConnectionHandle};

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
const FULL_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const MIN_FANOUT_SPACING: Duration = Duration::from_millis(2);
const MAX_FANOUT_SPACING: Duration = Duration::from_millis(50);

pub async fn ws_subscriber_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(ToOwned::to_owned);
    ws.on_upgrade(move |socket| handle_subscriber_socket(socket, state, token))
}

async fn handle_subscriber_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let Some(token_str) = token else {
        return reject(socket, error_codes::INVALID_TOKEN, "missing Authorization header").await;
    };
    let Some(claims) = validate_token(&state.pool, &token_str).await else {
        return reject(socket, error_codes::INVALID_TOKEN, "unknown or revoked token").await;
    };

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CHANNEL_CAPACITY);
    let connection_id = Uuid::new_v4().to_string();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else { continue };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let handle = Arc::new(ConnectionHandle { tx, event_task: Mutex::new(None) });
    state.register_connection(&connection_id, handle.clone()).await;

    let record = json!({
        "connectionId": connection_id,
        "clientId": claims.client_id,
        "subscribedEventId": 0,
    })
    .to_string();
    if let Err(e) = state.bus.hset(keys::status_connections(), &connection_id, &record).await {
        warn!(error = %e, "failed to register subscriber connection");
    }
    info!(client_id = %claims.client_id, connection_id = %connection_id, "subscriber connected");

    let mut subscribed_event_id: Option<i64> = None;

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "subscriber websocket error");
                break;
            }
        };

        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                pipeline_metrics::increment_decode_error("subscriber_ws");
                send_error(&handle, error_codes::PROTOCOL_ERROR, &format!("invalid JSON: {e}")).await;
                continue;
            }
        };

        handle_client_message(&state, &handle, &connection_id, &mut subscribed_event_id, parsed).await;
    }

    if let Some(event_id) = subscribed_event_id {
        unsubscribe_from_event(&state, &handle, event_id, &connection_id).await;
    }
    state.remove_connection_from_all_groups(&connection_id).await;
    state.remove_connection(&connection_id).await;
    let _ = state.bus.hdel(keys::status_connections(), &connection_id).await;
    writer.abort();
    info!(connection_id = %connection_id, "subscriber disconnected");
}

async fn reject(mut socket: WebSocket, code: &str, message: &str) {
    let err = ErrorMessage { code: code.to_owned(), message: message.to_owned(), retryable: false };
    if let Ok(json) = serde_json::to_string(&err) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
}

async fn send_error(handle: &ConnectionHandle, code: &str, message: &str) {
    let _ = handle.tx.try_send(ServerMessage::ReceiveReset);
    warn!(code, message, "rejecting subscriber frame");
}

async fn handle_client_message(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    connection_id: &str,
    subscribed_event_id: &mut Option<i64>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::SubscribeToEvent { event_id } | ClientMessage::SubscribeToEventV2 { event_id } => {
            if let Some(prev) = subscribed_event_id.take() {
                unsubscribe_from_event(state, handle, prev, connection_id).await;
            }
            subscribe_to_event(state, handle, event_id, connection_id).await;
            *subscribed_event_id = Some(event_id);
        }
        ClientMessage::UnsubscribeFromEvent { event_id } | ClientMessage::UnsubscribeFromEventV2 { event_id } => {
            unsubscribe_from_event(state, handle, event_id, connection_id).await;
            if *subscribed_event_id == Some(event_id) {
                *subscribed_event_id = None;
            }
        }
        ClientMessage::SubscribeToControlLogs { event_id } => {
            state.join_control_logs(event_id, connection_id).await;
        }
        ClientMessage::UnsubscribeFromControlLogs { event_id } => {
            state.leave_control_logs(event_id, connection_id).await;
        }
        ClientMessage::SubscribeToCarControlLogs { event_id, car_number } => {
            state.join_car_control_logs(event_id, &car_number, connection_id).await;
        }
        ClientMessage::UnsubscribeFromCarControlLogs { event_id, car_number } => {
            state.leave_car_control_logs(event_id, &car_number, connection_id).await;
        }
        ClientMessage::SubscribeToInCarDriverEvent { event_id, car_number }
        | ClientMessage::SubscribeToInCarDriverEventV2 { event_id, car_number } => {
            state.join_in_car(event_id, &car_number, connection_id).await;
        }
        ClientMessage::UnsubscribeFromInCarDriverEvent { event_id, car_number }
        | ClientMessage::UnsubscribeFromInCarDriverEventV2 { event_id, car_number } => {
            state.leave_in_car(event_id, &car_number, connection_id).await;
        }
    }
}

/// Adds the connection to the event's subscriber group, updates its
/// connection record, and requests an initial snapshot from the owning
/// pipeline via the `send_full_status` channel.
async fn subscribe_to_event(state: &AppState, handle: &Arc<ConnectionHandle>, event_id: i64, connection_id: &str) {
    if let Err(e) = state
        .bus
        .hset(&keys::status_event_connections(event_id), connection_id, "1")
        .await
    {
        warn!(error = %e, "failed to join event subscriber group");
    }

    let bus = state.bus.clone();
    let tx = handle.tx.clone();
    let channel = keys::event_patches_channel(event_id);
    let task_connection_id = connection_id.to_owned();
    let task = tokio::spawn(async move {
        let Ok(mut pubsub) = bus.subscribe(&channel).await else {
            return;
        };
        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let Ok(payload) = msg.get_payload::<String>() else { continue };
            let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&payload) else { continue };

            // Only the scheduled full refresh needs anti-thundering-herd
            // spacing; patches and resets are delivered as soon as they arrive.
            if matches!(server_msg, ServerMessage::ReceiveMessage { .. }) {
                let delay = fanout_delay(&bus, event_id, &task_connection_id).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            if tx.send(server_msg).await.is_err() {
                break;
            }
        }
    });
    *handle.event_task.lock().await = Some(task);

    let request = json!({ "eventId": event_id, "connectionId": connection_id }).to_string();
    if let Err(e) = state.bus.publish(keys::send_full_status_channel(), &request).await {
        warn!(error = %e, "failed to request full status snapshot");
    }
}

/// Computes this connection's slot in the `T_full / N` spacing described for
/// the scheduled full refresh (clamped to [2 ms, 50 ms] so a small N doesn't
/// balloon the delay and a huge N doesn't collapse it to nothing). `N` is the
/// event's full subscriber count read from the shared connection hash, not
/// just this replica's local share, since subscribers are spread across
/// however many subscription-hub processes are running.
async fn fanout_delay(bus: &stream_bus::StreamBus, event_id: i64, connection_id: &str) -> Duration {
    let subscriber_ids = bus.hkeys(&keys::status_event_connections(event_id)).await.unwrap_or_default();
    let total = subscriber_ids.len().max(1);
    let spacing = stagger_spacing(total);
    let slot = stable_rank(connection_id, total);
    spacing * slot as u32
}

fn stagger_spacing(subscriber_count: usize) -> Duration {
    let raw = FULL_REFRESH_INTERVAL / subscriber_count.max(1) as u32;
    raw.clamp(MIN_FANOUT_SPACING, MAX_FANOUT_SPACING)
}

fn stable_rank(connection_id: &str, total: usize) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    connection_id.hash(&mut hasher);
    hasher.finish() % total.max(1) as u64
}

async fn unsubscribe_from_event(state: &AppState, handle: &Arc<ConnectionHandle>, event_id: i64, connection_id: &str) {
    if let Some(task) = handle.event_task.lock().await.take() {
        task.abort();
    }
    let _ = state.bus.hdel(&keys::status_event_connections(event_id), connection_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagger_spacing_clamps_to_the_configured_bounds() {
        assert_eq!(stagger_spacing(1), MAX_FANOUT_SPACING);
        assert_eq!(stagger_spacing(200), MIN_FANOUT_SPACING.max(FULL_REFRESH_INTERVAL / 200));
        assert_eq!(stagger_spacing(100_000), MIN_FANOUT_SPACING);
    }

    #[test]
    fn stable_rank_is_deterministic_and_in_range() {
        let total = 200;
        let a = stable_rank("conn-a", total);
        let b = stable_rank("conn-a", total);
        assert_eq!(a, b);
        assert!(a < total as u64);
    }

    #[test]
    fn stable_rank_spreads_distinct_connections_across_slots() {
        let total = 200;
        let slots: std::collections::HashSet<u64> =
            (0..total).map(|i| stable_rank(&format!("conn-{i}"), total)).collect();
        assert!(slots.len() > total / 2, "expected reasonable spread across slots, got {}", slots.len());
    }
}
