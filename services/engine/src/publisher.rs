//! C6: delivers patches to the event's subscriber group immediately after
//! each pipeline pass, and runs a scheduled full-refresh loop.
//!
//! Per-connection pacing (`T_full / N`, clamped to [2 ms, 50 ms]) assumes
//! the publishing process holds a handle to every connection directly.
//! This topology instead fans a single event out to horizontally-scaled
//! subscription-hub replicas over `event_patches:{eventId}`, each holding
//! its own slice of that event's connections; there's no single process
//! that can iterate the full connection set and sleep between sends. The
//! pipeline publishes once per pass (and once per full-refresh tick) to
//! that channel; `subscription-hub` applies the actual `T_full / N`
//! stagger per connection against the shared subscriber count before
//! relaying each full-refresh payload (see `ws_subscriber::fanout_delay`).

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use session_state::SessionState;
use stream_bus::keys;
use timing_protocol::{FullStatusPayload, ServerMessage};
use tracing::warn;

use crate::pipeline::PassResult;
use crate::state::EventEngine;

const FULL_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_PAYLOAD_TTL_SECS: u64 = 60;

pub async fn deliver(engine: &Arc<EventEngine>, result: PassResult) {
    let channel = keys::event_patches_channel(engine.event_id);

    if result.reset {
        publish(engine, &channel, &ServerMessage::ReceiveReset).await;
        return;
    }
    if let Some(patch) = result.session_patch {
        publish(engine, &channel, &ServerMessage::ReceiveSessionPatch(patch)).await;
    }
    if !result.car_patches.is_empty() {
        publish(engine, &channel, &ServerMessage::ReceiveCarPatches(result.car_patches)).await;
    }
}

async fn publish(engine: &Arc<EventEngine>, channel: &str, message: &ServerMessage) {
    let Ok(json) = serde_json::to_string(message) else {
        warn!("failed to serialize server message for publish");
        return;
    };
    if let Err(e) = engine.bus.publish(channel, &json).await {
        warn!(error = %e, "failed to publish patch to event channel");
    }
}

pub fn full_status_payload(state: &SessionState) -> FullStatusPayload {
    FullStatusPayload { session: state.clone(), generated_at: Utc::now() }
}

/// `base64(gzip(utf8(json(payload))))`, the legacy-transport wire format.
fn encode_payload(payload: &FullStatusPayload) -> Result<String, std::io::Error> {
    let json = serde_json::to_vec(payload)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let gzipped = encoder.finish()?;
    Ok(base64::engine::general_purpose::STANDARD.encode(gzipped))
}

/// Runs the scheduled full-refresh path: every `T_full`, serialize and
/// compress each live session's snapshot once, cache it in KV for
/// out-of-process consumers, and publish it once to the event channel for
/// subscription-hub replicas to fan out locally.
pub async fn run_full_refresh_loop(engine: Arc<EventEngine>) {
    let mut interval = tokio::time::interval(FULL_REFRESH_INTERVAL);
    loop {
        interval.tick().await;
        let session_ids: Vec<i64> = engine.sessions.read().await.keys().copied().collect();
        for session_id in session_ids {
            let Some(handle) = engine.sessions.read().await.get(&session_id).cloned() else { continue };
            let snapshot = handle.snapshot().await;
            let payload = full_status_payload(&snapshot);

            let encoded = match encode_payload(&payload) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to encode full status payload");
                    continue;
                }
            };

            if let Err(e) = engine.bus.set_ex(&keys::event_payload(engine.event_id), &encoded, EVENT_PAYLOAD_TTL_SECS).await {
                warn!(error = %e, "failed to cache full status payload");
            }

            let channel = keys::event_patches_channel(engine.event_id);
            publish(&engine, &channel, &ServerMessage::ReceiveMessage { payload: encoded }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn encode_payload_produces_a_decodable_gzip_payload() {
        let state = SessionState::new(1, 1, Utc::now());
        let payload = full_status_payload(&state);

        let encoded = encode_payload(&payload).expect("encode should succeed");
        let gzipped = base64::engine::general_purpose::STANDARD.decode(&encoded).expect("valid base64");

        let mut decoder = GzDecoder::new(gzipped.as_slice());
        let mut json = String::new();
        decoder.read_to_string(&mut json).expect("valid gzip stream");

        let decoded: FullStatusPayload = serde_json::from_str(&json).expect("valid json");
        assert_eq!(decoded.session.event_id, 1);
        assert_eq!(decoded.session.session_id, 1);
    }
}
