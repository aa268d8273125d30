//! The single-writer coordinator (C5): consumes `event_status_stream`,
//! decodes by feed kind, runs the fixed secondary-enricher chain, and
//! hands consolidated patches off to the publisher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use protocol_decoders::{
    apply_loop, apply_passing, apply_rmonitor, decode_rmonitor_line, LoopEffect, MultiloopDecoder,
    MultiloopEffect, MultiloopRecord, PassingEffect, RMonitorEffect,
};
use serde::Deserialize;
use session_state::{CarPositionPatch, Entry, FlagDuration, SessionState, SessionStatePatch};
use stream_bus::keys::{self, FeedKind};
use stream_bus::StreamEntry;
use timing_protocol::CompetitorMetadata;
use tracing::{debug, warn};

use crate::payloads::{ControlLogFeedEntry, DriverEventPayload, DriverTransPayload, VideoStatusPayload};
use crate::state::EventEngine;
use crate::{persistence_glue, publisher};

const RMONITOR_FULL_REFRESH_INTERVAL: u64 = 60;
const CONTROL_LOG_POLL_INTERVAL: Duration = Duration::from_secs(10);
const SLOW_MESSAGE_THRESHOLD: Duration = Duration::from_secs(1);

/// Outcome of one pipeline pass, ready for the publisher.
pub struct PassResult {
    pub session_id: i64,
    pub session_patch: Option<SessionStatePatch>,
    pub car_patches: Vec<CarPositionPatch>,
    pub reset: bool,
}

pub async fn run(engine: Arc<EventEngine>) {
    let stream = keys::event_status_stream(engine.event_id);
    let group = "engine";
    let consumer = engine.job_name.clone();

    tokio::spawn(run_control_log_poll(engine.clone()));
    tokio::spawn(run_staleness_poll(engine.clone()));

    let bus = engine.bus.clone();
    bus.run_read_loop(&stream, group, &consumer, Duration::from_secs(5), move |entry| {
            let engine = engine.clone();
            async move {
                process_entry(&engine, entry).await;
            }
        })
        .await;
}

async fn process_entry(engine: &Arc<EventEngine>, entry: StreamEntry) {
    for (tag, value) in &entry.fields {
        let Some((kind, event_id, tagged_session)) = keys::parse_field_tag(tag) else {
            debug!(tag, "dropping entry with unrecognized field tag");
            continue;
        };
        if event_id != engine.event_id {
            continue;
        }
        let started = Instant::now();
        if let Some(result) = process_field(engine, kind, tagged_session, value).await {
            publisher::deliver(engine, result).await;
        }
        let elapsed = started.elapsed();
        pipeline_metrics::record_pipeline_message_processed(engine.event_id, elapsed);
        pipeline_metrics::set_pipeline_health(engine.event_id, elapsed < SLOW_MESSAGE_THRESHOLD);
    }
}

async fn process_field(engine: &Arc<EventEngine>, kind: FeedKind, tagged_session: i64, value: &str) -> Option<PassResult> {
    match kind {
        FeedKind::SessionChanged => {
            let Some(session_id) = decode_json::<SessionChangedPayload>(value, "session_changed") else { return None };
            engine.mark_live(session_id.session_id).await;
            let handle = engine.session_handle(session_id.session_id).await;
            enrichers::mark_session_updated(&mut *handle.write().await, Utc::now());
            None
        }
        FeedKind::RMonitor => process_rmonitor(engine, tagged_session, value).await,
        FeedKind::Multiloop => process_multiloop(engine, tagged_session, value).await,
        FeedKind::X2Pass => process_passings(engine, tagged_session, value).await,
        FeedKind::X2Loops => process_loops(engine, tagged_session, value).await,
        FeedKind::Flags => process_flags(engine, tagged_session, value).await,
        FeedKind::Competitors => process_competitors(engine, tagged_session, value).await,
        FeedKind::DriverEvent => process_driver_event(engine, tagged_session, value).await,
        FeedKind::DriverTrans => process_driver_trans(engine, tagged_session, value).await,
        FeedKind::Video => process_video(engine, tagged_session, value).await,
        FeedKind::ConfigChanged => process_config_changed(engine, tagged_session, value).await,
    }
}

#[derive(Deserialize)]
struct SessionChangedPayload {
    #[serde(rename = "sessionId")]
    session_id: i64,
}

fn decode_json<T: for<'de> Deserialize<'de>>(value: &str, feed: &str) -> Option<T> {
    match serde_json::from_str(value) {
        Ok(v) => Some(v),
        Err(e) => {
            pipeline_metrics::increment_decode_error(feed);
            warn!(error = %e, feed, "dropping malformed entry");
            None
        }
    }
}

async fn process_rmonitor(engine: &Arc<EventEngine>, session_id: i64, line: &str) -> Option<PassResult> {
    let record = match decode_rmonitor_line(line) {
        Ok(r) => r,
        Err(e) => {
            pipeline_metrics::increment_decode_error("rmonitor");
            warn!(error = %e, "dropping malformed rmonitor line");
            return None;
        }
    };
    let handle = engine.session_handle(session_id).await;
    let tick = engine.bump_rmonitor_tick(session_id).await;

    let mut state = handle.write().await;
    let prior = state.clone();
    enrichers::mark_session_updated(&mut state, Utc::now());
    let effect = apply_rmonitor(&record, &mut state);

    let mut car_patches = Vec::new();
    let mut session_patch = None;
    match effect {
        RMonitorEffect::Car(patch) => {
            let number = patch.number.clone();
            car_patches.push(patch);
            car_patches.extend(run_secondary_chain(engine, &mut state, session_id, &[number]).await);
        }
        RMonitorEffect::Session(patch) => session_patch = Some(patch),
        RMonitorEffect::None => {}
    }

    if tick % RMONITOR_FULL_REFRESH_INTERVAL == 0 {
        car_patches.extend(enrichers::refresh_driver_video(&mut state, &*engine.driver_cache, &*engine.video_cache));
    }

    finish_pass(engine, &mut state, session_id, Some(&prior), session_patch, car_patches).await
}

async fn process_multiloop(engine: &Arc<EventEngine>, session_id: i64, line: &str) -> Option<PassResult> {
    let record: MultiloopRecord = match protocol_decoders::multiloop::decode_line(line) {
        Ok(r) => r,
        Err(e) => {
            pipeline_metrics::increment_decode_error("multiloop");
            warn!(error = %e, "dropping malformed multiloop line");
            return None;
        }
    };

    let handle = engine.session_handle(session_id).await;
    let mut decoders = engine.multiloop.lock().await;
    let decoder = decoders.entry(session_id).or_insert_with(MultiloopDecoder::new);

    let mut state = handle.write().await;
    let prior = state.clone();
    enrichers::mark_session_updated(&mut state, Utc::now());
    let effect = decoder.apply(&record, &mut state);
    drop(decoders);

    let mut car_patches = Vec::new();
    let mut session_patch = None;
    match effect {
        MultiloopEffect::Car(patch) => {
            let number = patch.number.clone();
            car_patches.push(patch);
            car_patches.extend(run_secondary_chain(engine, &mut state, session_id, &[number]).await);
        }
        MultiloopEffect::SectionStateUpdate { number } => {
            car_patches.extend(run_secondary_chain(engine, &mut state, session_id, &[number]).await);
        }
        MultiloopEffect::Session(patch) => session_patch = Some(patch),
        MultiloopEffect::None => {}
    }

    finish_pass(engine, &mut state, session_id, Some(&prior), session_patch, car_patches).await
}

async fn process_passings(engine: &Arc<EventEngine>, session_id: i64, value: &str) -> Option<PassResult> {
    let passings: Vec<timing_protocol::Passing> = decode_json(value, "x2pass")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();
    enrichers::mark_session_updated(&mut state, Utc::now());

    let mut affected = Vec::new();
    let mut car_patches = Vec::new();
    for passing in &passings {
        if let PassingEffect::Car(patch) = apply_passing(passing, &mut state) {
            affected.push(patch.number.clone());
            car_patches.push(patch);
        }
    }
    if !affected.is_empty() {
        car_patches.extend(run_secondary_chain(engine, &mut state, session_id, &affected).await);
    }

    finish_pass(engine, &mut state, session_id, Some(&prior), None, car_patches).await
}

async fn process_loops(engine: &Arc<EventEngine>, tagged_session: i64, value: &str) -> Option<PassResult> {
    let session_id = engine.resolve_session_id(tagged_session).await?;
    let loops: Vec<timing_protocol::Loop> = decode_json(value, "x2loops")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();

    let mut session_patch: Option<SessionStatePatch> = None;
    for l in &loops {
        if let LoopEffect::Session(patch) = apply_loop(l, &mut state) {
            session_patch = Some(merge_session_patch(session_patch, patch));
        }
    }
    // Track topology changed: re-derive steady-state pit status for every car.
    let car_patches = enrichers::resync_pit_state(&mut state);

    finish_pass(engine, &mut state, session_id, Some(&prior), session_patch, car_patches).await
}

async fn process_flags(engine: &Arc<EventEngine>, session_id: i64, value: &str) -> Option<PassResult> {
    let flags: Vec<FlagDuration> = decode_json(value, "flags")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();
    for flag in &flags {
        if flag.end_time.is_none() {
            enrichers::apply_flag_change(&mut state, flag.flag, flag.start_time);
        }
    }
    let mut session_patch = SessionStatePatch::identity(state.session_id);
    session_patch.current_flag = Some(state.current_flag);
    session_patch.flag_durations = Some(state.flag_durations.clone());
    session_patch.green_ms = Some(state.green_ms);
    session_patch.yellow_ms = Some(state.yellow_ms);
    session_patch.red_ms = Some(state.red_ms);
    session_patch.num_yellows = Some(state.num_yellows);
    finish_pass(engine, &mut state, session_id, Some(&prior), Some(session_patch), Vec::new()).await
}

async fn process_competitors(engine: &Arc<EventEngine>, tagged_session: i64, value: &str) -> Option<PassResult> {
    let session_id = engine.resolve_session_id(tagged_session).await?;
    let competitors: Vec<CompetitorMetadata> = decode_json(value, "competitors")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();

    let mut affected = Vec::new();
    for c in &competitors {
        upsert_entry(&mut state, &c.car_number, c.class.as_deref(), c.driver_name.clone(), c.transponder_id.clone());
        engine.driver_cache.set(
            &c.car_number,
            c.transponder_id.as_deref(),
            enrichers::DriverInfo { name: c.driver_name.clone(), id: c.driver_id.clone() },
        );
        affected.push(c.car_number.clone());
    }
    let car_patches = run_secondary_chain(engine, &mut state, session_id, &affected).await;
    finish_pass(engine, &mut state, session_id, Some(&prior), None, car_patches).await
}

async fn process_driver_event(engine: &Arc<EventEngine>, tagged_session: i64, value: &str) -> Option<PassResult> {
    let session_id = engine.resolve_session_id(tagged_session).await?;
    let payload: DriverEventPayload = decode_json(value, "driver_event")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();
    let transponder = state.car(&payload.car_number).and_then(|c| c.transponder_id.clone());
    engine.driver_cache.set(
        &payload.car_number,
        transponder.as_deref(),
        enrichers::DriverInfo { name: payload.driver_name, id: payload.driver_id },
    );
    let car_patches = run_secondary_chain(engine, &mut state, session_id, &[payload.car_number]).await;
    finish_pass(engine, &mut state, session_id, Some(&prior), None, car_patches).await
}

async fn process_driver_trans(engine: &Arc<EventEngine>, tagged_session: i64, value: &str) -> Option<PassResult> {
    let session_id = engine.resolve_session_id(tagged_session).await?;
    let payload: DriverTransPayload = decode_json(value, "driver_trans")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let class = state.car(&payload.car_number).map(|c| c.class.clone()).unwrap_or_default();
    upsert_entry(&mut state, &payload.car_number, Some(&class), None, Some(payload.transponder_id.clone()));
    if let Some(car) = state.car_mut(&payload.car_number) {
        car.transponder_id = Some(payload.transponder_id);
    }
    None
}

async fn process_video(engine: &Arc<EventEngine>, tagged_session: i64, value: &str) -> Option<PassResult> {
    let session_id = engine.resolve_session_id(tagged_session).await?;
    let payload: VideoStatusPayload = decode_json(value, "video")?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();
    engine.video_cache.set(&payload.car_number, payload.status);
    let car_patches = run_secondary_chain(engine, &mut state, session_id, &[payload.car_number]).await;
    finish_pass(engine, &mut state, session_id, Some(&prior), None, car_patches).await
}

async fn process_config_changed(engine: &Arc<EventEngine>, tagged_session: i64, _value: &str) -> Option<PassResult> {
    let session_id = engine.resolve_session_id(tagged_session).await?;
    let handle = engine.session_handle(session_id).await;
    let mut state = handle.write().await;
    let prior = state.clone();
    let car_patches = enrichers::resync_pit_state(&mut state);
    finish_pass(engine, &mut state, session_id, Some(&prior), None, car_patches).await
}

fn upsert_entry(state: &mut SessionState, number: &str, class: Option<&str>, driver_name: Option<String>, transponder_id: Option<String>) {
    if let Some(entry) = state.entries.iter_mut().find(|e| e.number == number) {
        if let Some(class) = class {
            entry.class = class.to_owned();
        }
        if driver_name.is_some() {
            entry.driver_name = driver_name;
        }
        if transponder_id.is_some() {
            entry.transponder_id = transponder_id;
        }
    } else {
        state.entries.push(Entry {
            number: number.to_owned(),
            class: class.unwrap_or_default().to_owned(),
            driver_name,
            transponder_id,
        });
    }
}

/// Each `apply_loop` call returns a patch carrying the full post-mutation
/// `track_sections` snapshot, so when a batch touches multiple loops the
/// last patch seen is the one that matches final state.
fn merge_session_patch(_existing: Option<SessionStatePatch>, incoming: SessionStatePatch) -> SessionStatePatch {
    incoming
}

/// Runs the fixed position -> driver/video secondary chain for the given
/// affected car numbers. Pit re-sync is triggered separately by
/// configuration-change/loop-topology messages rather than on every
/// message, matching the pit enricher's own re-sync contract.
async fn run_secondary_chain(engine: &Arc<EventEngine>, state: &mut SessionState, session_id: i64, affected: &[String]) -> Vec<CarPositionPatch> {
    let before: Vec<_> = state.car_positions.clone();
    enrichers::enrich_positions(state);
    let mut patches: Vec<CarPositionPatch> = before
        .iter()
        .filter_map(|prior| state.car(&prior.number).and_then(|after| session_state::diff_car(prior, after)))
        .collect();

    for number in affected {
        if let Some(patch) = enrichers::refresh_driver_video_for_car(state, number, &*engine.driver_cache, &*engine.video_cache) {
            patches.push(patch);
        }
        let prior_lap = engine.take_prior_lap(session_id, number).await;
        let event = state
            .car_mut(number)
            .and_then(|car| enrichers::detect_lap_completion(prior_lap, car, Utc::now()));
        if let Some(event) = event {
            engine.record_lap(session_id, number, event.lap_number).await;
            if let Some(car) = state.car(number) {
                persistence_glue::record_lap(engine, session_id, car, &event).await;
            }
        }
    }
    patches
}

async fn finish_pass(
    engine: &Arc<EventEngine>,
    state: &mut SessionState,
    session_id: i64,
    prior: Option<&SessionState>,
    session_patch: Option<SessionStatePatch>,
    car_patches: Vec<CarPositionPatch>,
) -> Option<PassResult> {
    let consolidated = enrichers::consolidate(car_patches);
    if let Err(violation) = session_state::validate(state, prior) {
        warn!(error = %violation, session_id, "invariant violation after pipeline pass, requesting reset");
        return Some(PassResult { session_id, session_patch: None, car_patches: Vec::new(), reset: true });
    }
    if consolidated.is_empty() && session_patch.is_none() {
        return None;
    }
    Some(PassResult { session_id, session_patch, car_patches: consolidated, reset: false })
}

const STALENESS_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Independent of message arrival: marks sessions `Stale` once they've
/// gone `DEFAULT_STALE_AFTER` without an update.
async fn run_staleness_poll(engine: Arc<EventEngine>) {
    let mut interval = tokio::time::interval(STALENESS_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let handles: Vec<_> = engine.sessions.read().await.values().cloned().collect();
        for handle in handles {
            enrichers::check_staleness(&mut *handle.write().await, Utc::now(), enrichers::DEFAULT_STALE_AFTER);
        }
    }
}

async fn run_control_log_poll(engine: Arc<EventEngine>) {
    let mut interval = tokio::time::interval(CONTROL_LOG_POLL_INTERVAL);
    loop {
        interval.tick().await;
        let key = keys::control_log_entries(engine.event_id);
        let entries: Vec<ControlLogFeedEntry> = match engine.bus.get(&key).await {
            Ok(Some(entries)) => entries,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "failed to poll control-log cache");
                continue;
            }
        };
        if entries.is_empty() {
            continue;
        }
        let Some(session_id) = engine.resolve_session_id(0).await else { continue };
        let handle = engine.session_handle(session_id).await;
        let mut state = handle.write().await;
        let prior = state.clone();
        let mut patches = Vec::new();
        for entry in &entries {
            let decoded = enrichers::ControlLogEntry {
                text: entry.text.clone(),
                cars_mentioned: entry.cars_mentioned.clone(),
                highlighted_car: entry.highlighted_car.clone(),
            };
            if let Some(patch) = enrichers::apply_control_log_entry(&decoded, &mut state) {
                patches.push(patch);
            }
        }
        if let Some(result) = finish_pass(&engine, &mut state, session_id, Some(&prior), None, patches).await {
            drop(state);
            publisher::deliver(&engine, result).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::SessionState;

    fn state() -> SessionState {
        SessionState::new(1, 1, Utc::now())
    }

    #[test]
    fn upsert_entry_inserts_new_entry() {
        let mut state = state();
        upsert_entry(&mut state, "12", Some("GT3"), Some("Alice".to_owned()), Some("tx-1".to_owned()));

        assert_eq!(state.entries.len(), 1);
        let entry = &state.entries[0];
        assert_eq!(entry.class, "GT3");
        assert_eq!(entry.driver_name.as_deref(), Some("Alice"));
        assert_eq!(entry.transponder_id.as_deref(), Some("tx-1"));
    }

    #[test]
    fn upsert_entry_merges_into_existing_entry_without_clobbering_fields() {
        let mut state = state();
        upsert_entry(&mut state, "12", Some("GT3"), Some("Alice".to_owned()), None);
        upsert_entry(&mut state, "12", None, None, Some("tx-1".to_owned()));

        assert_eq!(state.entries.len(), 1);
        let entry = &state.entries[0];
        assert_eq!(entry.class, "GT3");
        assert_eq!(entry.driver_name.as_deref(), Some("Alice"));
        assert_eq!(entry.transponder_id.as_deref(), Some("tx-1"));
    }

    #[test]
    fn merge_session_patch_prefers_the_last_patch_seen() {
        let first = SessionStatePatch::identity(1);
        let mut second = SessionStatePatch::identity(1);
        second.laps_to_go = Some(Some(5));

        let merged = merge_session_patch(None, first);
        let merged = merge_session_patch(Some(merged), second);
        assert_eq!(merged.laps_to_go, Some(Some(5)));
    }

    #[test]
    fn decode_json_returns_none_on_malformed_payload() {
        let result: Option<SessionChangedPayload> = decode_json("not json", "session_changed");
        assert!(result.is_none());
    }

    #[test]
    fn decode_json_decodes_well_formed_payload() {
        let result: Option<SessionChangedPayload> = decode_json(r#"{"sessionId": 42}"#, "session_changed");
        assert_eq!(result.map(|p| p.session_id), Some(42));
    }
}
