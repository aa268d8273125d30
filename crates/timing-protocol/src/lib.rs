//! Wire types shared between the relay hub, the subscription hub, and the
//! per-event engine.
//!
//! Relay and client messages use a top-level `kind` field for discriminated
//! deserialization, matching the envelope style of every other message type
//! in this system.

use serde::{Deserialize, Serialize};
use session_state::{CarPositionPatch, FlagDuration, InCarVideoStatus, SessionState, SessionStatePatch};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// One transponder crossing, as received in a `SendPassings` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passing {
    pub transponder_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub is_in_pit: bool,
    pub is_resend: bool,
}

/// A timing loop definition, as received in a `SendLoopChange` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub name: String,
    pub is_in_pit: bool,
    pub is_pit_start_finish: bool,
}

/// Static roster/identity metadata pushed by the relay, independent of
/// live timing updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorMetadata {
    pub car_number: String,
    pub driver_name: Option<String>,
    pub driver_id: Option<String>,
    pub class: Option<String>,
    pub transponder_id: Option<String>,
}

/// One parsed race-control entry, forwarded to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlLogEntryDto {
    pub text: String,
    pub cars_mentioned: Vec<String>,
    pub posted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarControlLogs {
    pub car_number: String,
    pub entries: Vec<ControlLogEntryDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InCarPayload {
    pub car_number: String,
    pub driver_name: Option<String>,
    pub video_status: Option<InCarVideoStatus>,
}

/// The full snapshot carried inside a `ReceiveMessage` envelope, wire
/// format `base64(gzip(utf8(json(FullStatusPayload))))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullStatusPayload {
    pub session: SessionState,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

// ---------------------------------------------------------------------------
// Relay ingress (authenticated, realtime)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum RelayMessage {
    SendHeartbeat {
        event_id: i64,
    },
    /// `command` is one newline-terminated result-monitor record.
    SendRMonitor {
        event_id: i64,
        session_id: i64,
        command: String,
    },
    SendSessionChange {
        event_id: i64,
        session_id: i64,
        session_name: String,
        time_zone_offset: f64,
    },
    SendPassings {
        event_id: i64,
        session_id: i64,
        passings: Vec<Passing>,
    },
    SendLoopChange {
        event_id: i64,
        loops: Vec<Loop>,
    },
    SendFlags {
        event_id: i64,
        session_id: i64,
        flags: Vec<FlagDuration>,
    },
    SendCompetitorMetadata {
        event_id: i64,
        competitors: Vec<CompetitorMetadata>,
    },
}

// ---------------------------------------------------------------------------
// Client egress (subscription management)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeToEvent { event_id: i64 },
    SubscribeToEventV2 { event_id: i64 },
    UnsubscribeFromEvent { event_id: i64 },
    UnsubscribeFromEventV2 { event_id: i64 },
    SubscribeToControlLogs { event_id: i64 },
    UnsubscribeFromControlLogs { event_id: i64 },
    SubscribeToCarControlLogs { event_id: i64, car_number: String },
    UnsubscribeFromCarControlLogs { event_id: i64, car_number: String },
    SubscribeToInCarDriverEvent { event_id: i64, car_number: String },
    SubscribeToInCarDriverEventV2 { event_id: i64, car_number: String },
    UnsubscribeFromInCarDriverEvent { event_id: i64, car_number: String },
    UnsubscribeFromInCarDriverEventV2 { event_id: i64, car_number: String },
}

// ---------------------------------------------------------------------------
// Server-initiated (push to subscribed clients)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// `base64(gzip(utf8(json(FullStatusPayload))))`.
    ReceiveMessage { payload: String },
    ReceiveSessionPatch(SessionStatePatch),
    ReceiveCarPatches(Vec<CarPositionPatch>),
    ReceiveReset,
    ReceiveControlLog(CarControlLogs),
    ReceiveInCarUpdateV2(InCarPayload),
}

/// Frozen error codes surfaced to relays and clients over the control
/// channel.
pub mod error_codes {
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const AUTHORIZATION_MISMATCH: &str = "AUTHORIZATION_MISMATCH";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_message_round_trips_through_json_with_kind_tag() {
        let msg = RelayMessage::SendHeartbeat { event_id: 7 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "send_heartbeat");
        assert_eq!(json["event_id"], 7);
        let back: RelayMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn client_message_subscribe_v2_tags_correctly() {
        let msg = ClientMessage::SubscribeToEventV2 { event_id: 3 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "subscribe_to_event_v2");
    }

    #[test]
    fn server_message_reset_has_no_payload_fields() {
        let msg = ServerMessage::ReceiveReset;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "receive_reset");
    }
}
