//! Canonical Redis key and stream field-tag layout shared by every
//! service that touches the bus.

/// The per-event ingestion stream.
pub fn event_status_stream(event_id: i64) -> String {
    format!("event_status_stream:{event_id}")
}

/// The feed kinds that can appear in a stream field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    RMonitor,
    Multiloop,
    X2Pass,
    X2Loops,
    Flags,
    Competitors,
    SessionChanged,
    DriverEvent,
    DriverTrans,
    Video,
    ConfigChanged,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::RMonitor => "rmon",
            FeedKind::Multiloop => "multiloop",
            FeedKind::X2Pass => "x2pass",
            FeedKind::X2Loops => "x2loops",
            FeedKind::Flags => "flags",
            FeedKind::Competitors => "competitors",
            FeedKind::SessionChanged => "session_changed",
            FeedKind::DriverEvent => "driver_event",
            FeedKind::DriverTrans => "driver_trans",
            FeedKind::Video => "video",
            FeedKind::ConfigChanged => "config_changed",
        }
    }

    /// Parses a tag component back into a [`FeedKind`]. The inverse of
    /// [`FeedKind::as_str`]; used by consumers decoding `field_tag` values
    /// read off the bus.
    pub fn from_str(s: &str) -> Option<FeedKind> {
        Some(match s {
            "rmon" => FeedKind::RMonitor,
            "multiloop" => FeedKind::Multiloop,
            "x2pass" => FeedKind::X2Pass,
            "x2loops" => FeedKind::X2Loops,
            "flags" => FeedKind::Flags,
            "competitors" => FeedKind::Competitors,
            "session_changed" => FeedKind::SessionChanged,
            "driver_event" => FeedKind::DriverEvent,
            "driver_trans" => FeedKind::DriverTrans,
            "video" => FeedKind::Video,
            "config_changed" => FeedKind::ConfigChanged,
            _ => return None,
        })
    }
}

/// The stream entry field tag for one feed kind within one session.
pub fn field_tag(kind: FeedKind, event_id: i64, session_id: i64) -> String {
    format!("{}-{event_id}-{session_id}", kind.as_str())
}

/// Splits a `field_tag` back into its components. Field tags never embed
/// extra hyphens since `FeedKind::as_str` values don't contain them.
pub fn parse_field_tag(tag: &str) -> Option<(FeedKind, i64, i64)> {
    let mut parts = tag.splitn(3, '-');
    let kind = FeedKind::from_str(parts.next()?)?;
    let event_id: i64 = parts.next()?.parse().ok()?;
    let session_id: i64 = parts.next()?.parse().ok()?;
    Some((kind, event_id, session_id))
}

pub fn event_service_endpoint(event_id: i64) -> String {
    format!("event_service_endpoint:{event_id}")
}

pub fn event_payload(event_id: i64) -> String {
    format!("event_payload:{event_id}")
}

pub fn status_connections() -> &'static str {
    "status_connections"
}

pub fn status_event_connections(event_id: i64) -> String {
    format!("status_event_connections:{event_id}")
}

pub fn relay_event_connections() -> &'static str {
    "relay_event_connections"
}

pub fn relay_connection(connection_id: &str) -> String {
    format!("relay_connection:{connection_id}")
}

pub fn relay_heartbeat(event_id: i64) -> String {
    format!("relay_heartbeat:{event_id}")
}

pub fn send_full_status_channel() -> &'static str {
    "send_full_status"
}

/// Pub/sub channel the per-event owner process publishes consolidated
/// patches and resets on; subscription-hub replicas subscribe to fan out
/// to their local connections in that event's group. Not part of the
/// named key/channel layout but required to bridge C6 and C8 across
/// process boundaries.
pub fn event_patches_channel(event_id: i64) -> String {
    format!("event_patches:{event_id}")
}

pub fn client_id(client_id: &str) -> String {
    format!("client_id:{client_id}")
}

pub fn competitor_metadata(car_number: &str, event_id: i64) -> String {
    format!("competitor_metadata:{car_number}:{event_id}")
}

/// Cache of parsed race-control entries for one event, populated by an
/// external control-log provider outside this system. Not part of the
/// named key layout; invented so the penalty enricher has somewhere to
/// poll from, mirroring the `competitor_metadata` cache pattern.
pub fn control_log_entries(event_id: i64) -> String {
    format!("control_log_entries:{event_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_tag_matches_canonical_layout() {
        assert_eq!(field_tag(FeedKind::RMonitor, 7, 3), "rmon-7-3");
        assert_eq!(field_tag(FeedKind::Multiloop, 7, 3), "multiloop-7-3");
    }

    #[test]
    fn key_builders_match_canonical_layout() {
        assert_eq!(event_status_stream(7), "event_status_stream:7");
        assert_eq!(event_service_endpoint(7), "event_service_endpoint:7");
        assert_eq!(competitor_metadata("42", 7), "competitor_metadata:42:7");
    }

    #[test]
    fn field_tag_round_trips_through_parse() {
        let tag = field_tag(FeedKind::Multiloop, 7, 3);
        assert_eq!(parse_field_tag(&tag), Some((FeedKind::Multiloop, 7, 3)));
    }

    #[test]
    fn parse_field_tag_rejects_unknown_kind() {
        assert_eq!(parse_field_tag("bogus-7-3"), None);
    }
}
