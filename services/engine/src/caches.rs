//! Synchronous, in-process mirrors of external driver/video telemetry.
//!
//! `DriverLookup`/`VideoLookup` are called from inside enrichers while the
//! session's write lock is held, so the cache itself must not need to
//! `.await` — `std::sync::RwLock` rather than the tokio flavor used
//! everywhere else in this crate.

use enrichers::{DriverInfo, DriverLookup, VideoLookup};
use session_state::InCarVideoStatus;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct DriverCache {
    by_number: RwLock<HashMap<String, DriverInfo>>,
    by_transponder: RwLock<HashMap<String, DriverInfo>>,
}

impl DriverCache {
    pub fn set(&self, number: &str, transponder_id: Option<&str>, info: DriverInfo) {
        self.by_number.write().expect("driver cache poisoned").insert(number.to_owned(), info.clone());
        if let Some(t) = transponder_id {
            self.by_transponder.write().expect("driver cache poisoned").insert(t.to_owned(), info);
        }
    }
}

impl DriverLookup for DriverCache {
    fn lookup(&self, _event_id: i64, number: &str, transponder_id: Option<&str>) -> Option<DriverInfo> {
        if let Some(info) = self.by_number.read().expect("driver cache poisoned").get(number).cloned() {
            return Some(info);
        }
        let transponder_id = transponder_id?;
        self.by_transponder.read().expect("driver cache poisoned").get(transponder_id).cloned()
    }
}

#[derive(Default)]
pub struct VideoCache {
    by_number: RwLock<HashMap<String, InCarVideoStatus>>,
}

impl VideoCache {
    pub fn set(&self, number: &str, status: InCarVideoStatus) {
        self.by_number.write().expect("video cache poisoned").insert(number.to_owned(), status);
    }
}

impl VideoLookup for VideoCache {
    fn lookup(&self, _event_id: i64, number: &str, _transponder_id: Option<&str>) -> Option<InCarVideoStatus> {
        self.by_number.read().expect("video cache poisoned").get(number).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_lookup_falls_back_to_transponder() {
        let cache = DriverCache::default();
        let info = DriverInfo { name: Some("Alice".to_owned()), id: Some("d1".to_owned()) };
        cache.set("12", Some("tx-9"), info.clone());

        assert_eq!(DriverLookup::lookup(&cache, 1, "12", None), Some(info.clone()));
        assert_eq!(DriverLookup::lookup(&cache, 1, "unknown", Some("tx-9")), Some(info));
        assert_eq!(DriverLookup::lookup(&cache, 1, "unknown", Some("tx-missing")), None);
    }

    #[test]
    fn driver_lookup_by_number_wins_over_stale_transponder_entry() {
        let cache = DriverCache::default();
        cache.set("12", Some("tx-9"), DriverInfo { name: Some("Alice".to_owned()), id: None });
        cache.set("12", None, DriverInfo { name: Some("Bob".to_owned()), id: None });

        let found = DriverLookup::lookup(&cache, 1, "12", Some("tx-9")).unwrap();
        assert_eq!(found.name.as_deref(), Some("Bob"));
    }

    #[test]
    fn video_cache_round_trips_status() {
        let cache = VideoCache::default();
        assert_eq!(VideoLookup::lookup(&cache, 1, "44", None), None);
        cache.set("44", InCarVideoStatus::Live);
        assert_eq!(VideoLookup::lookup(&cache, 1, "44", None), Some(InCarVideoStatus::Live));
    }
}
