use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use protocol_decoders::MultiloopDecoder;
use session_state::{SessionState, SessionStateHandle};
use sqlx::PgPool;
use stream_bus::StreamBus;
use tokio::sync::{Mutex, RwLock};

use crate::caches::{DriverCache, VideoCache};
use crate::config::EngineConfig;

/// Every piece of state owned by one event's pipeline process. One
/// instance is constructed per process since each event has exactly one
/// owner; sessions within the event are created lazily as they're seen on
/// the stream.
pub struct EventEngine {
    pub event_id: i64,
    pub job_name: String,
    pub pool: PgPool,
    pub bus: StreamBus,

    pub sessions: RwLock<HashMap<i64, SessionStateHandle>>,
    /// Stateful multiloop decoders, one per session, kept alive across
    /// messages since the decoder tracks per-car lap/section caches.
    pub multiloop: Mutex<HashMap<i64, MultiloopDecoder>>,
    /// Counts result-monitor messages per session for the every-60 full
    /// driver/video refresh tick.
    pub rmonitor_tick: Mutex<HashMap<i64, u64>>,
    /// Tracks each car's last-seen `lastLapCompleted` per session so the
    /// lap processor can detect advances.
    pub prior_lap: Mutex<HashMap<i64, HashMap<String, i32>>>,
    /// Routes event-level feeds (loop-change, competitor metadata) tagged
    /// with session id 0 to whichever session is currently live.
    pub live_session_id: RwLock<Option<i64>>,

    pub driver_cache: Arc<DriverCache>,
    pub video_cache: Arc<VideoCache>,
}

impl EventEngine {
    pub fn new(config: &EngineConfig, pool: PgPool, bus: StreamBus) -> Arc<Self> {
        Arc::new(Self {
            event_id: config.event_id,
            job_name: config.job_name.clone(),
            pool,
            bus,
            sessions: RwLock::new(HashMap::new()),
            multiloop: Mutex::new(HashMap::new()),
            rmonitor_tick: Mutex::new(HashMap::new()),
            prior_lap: Mutex::new(HashMap::new()),
            live_session_id: RwLock::new(None),
            driver_cache: Arc::new(DriverCache::default()),
            video_cache: Arc::new(VideoCache::default()),
        })
    }

    /// Returns the handle for `session_id`, creating a fresh `PreLive`
    /// session if this is the first time it's been seen.
    pub async fn session_handle(&self, session_id: i64) -> SessionStateHandle {
        if let Some(handle) = self.sessions.read().await.get(&session_id) {
            return handle.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id)
            .or_insert_with(|| SessionStateHandle::new(SessionState::new(self.event_id, session_id, Utc::now())))
            .clone()
    }

    /// Resolves a field tag's session id of `0` (event-level feeds) to the
    /// currently-live session, if any.
    pub async fn resolve_session_id(&self, tagged: i64) -> Option<i64> {
        if tagged != 0 {
            return Some(tagged);
        }
        *self.live_session_id.read().await
    }

    pub async fn mark_live(self: &Arc<Self>, session_id: i64) {
        let prior = self.live_session_id.write().await.replace(session_id);
        if let Some(prior_id) = prior {
            if prior_id != session_id {
                if let Some(handle) = self.sessions.read().await.get(&prior_id).cloned() {
                    let mut state = handle.write().await;
                    enrichers::finalize_session(&mut state);
                    crate::persistence_glue::archive_session_results(self, &state).await;
                }
            }
        }
    }

    pub async fn bump_rmonitor_tick(&self, session_id: i64) -> u64 {
        let mut ticks = self.rmonitor_tick.lock().await;
        let count = ticks.entry(session_id).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn take_prior_lap(&self, session_id: i64, number: &str) -> i32 {
        self.prior_lap
            .lock()
            .await
            .entry(session_id)
            .or_default()
            .get(number)
            .copied()
            .unwrap_or(0)
    }

    pub async fn record_lap(&self, session_id: i64, number: &str, lap: i32) {
        self.prior_lap.lock().await.entry(session_id).or_default().insert(number.to_owned(), lap);
    }
}
