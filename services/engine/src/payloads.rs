//! Bus payload shapes for feed kinds that have no corresponding relay
//! method: driver identity/transponder-association updates and in-car
//! video status, pushed directly onto the stream by external telemetry
//! providers using the same field-tag convention as relay-originated
//! feeds.

use serde::Deserialize;
use session_state::InCarVideoStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct DriverEventPayload {
    pub car_number: String,
    pub driver_name: Option<String>,
    pub driver_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverTransPayload {
    pub car_number: String,
    pub transponder_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoStatusPayload {
    pub car_number: String,
    pub status: InCarVideoStatus,
}

/// One entry from the externally-populated control-log cache, polled
/// periodically rather than pushed through the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlLogFeedEntry {
    pub text: String,
    pub cars_mentioned: Vec<String>,
    pub highlighted_car: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_status_payload_decodes_enum_by_variant_name() {
        let payload: VideoStatusPayload = serde_json::from_str(r#"{"car_number":"12","status":"Live"}"#).unwrap();
        assert_eq!(payload.car_number, "12");
        assert_eq!(payload.status, InCarVideoStatus::Live);
    }

    #[test]
    fn control_log_feed_entry_allows_missing_highlighted_car() {
        let payload: ControlLogFeedEntry =
            serde_json::from_str(r#"{"text":"Car 12 spins in turn 4","cars_mentioned":["12"]}"#).unwrap();
        assert_eq!(payload.highlighted_car, None);
        assert_eq!(payload.cars_mentioned, vec!["12".to_owned()]);
    }
}
