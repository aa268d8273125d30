//! The authoritative data model: one [`SessionState`] per live session, with
//! a [`CarPosition`] per car keyed by car number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel used for positions, gaps, and gains that cannot be computed.
pub const INVALID: i32 = -999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Green,
    Yellow,
    Red,
    White,
    Checkered,
    Black,
    Unknown,
}

impl Default for FlagKind {
    fn default() -> Self {
        FlagKind::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    Running,
    Pit,
    Stopped,
    Finished,
    Dnf,
    Unknown,
}

impl Default for CarStatus {
    fn default() -> Self {
        CarStatus::Unknown
    }
}

/// A single completed or currently-open flag period.
///
/// `start_time <= end_time` when `end_time` is set, and at most one entry
/// per flag kind has `end_time == None` at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDuration {
    pub flag: FlagKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTime {
    pub name: String,
    pub time_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InCarVideoStatus {
    Live,
    Offline,
    Unavailable,
}

/// A static roster entry, independent of live timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub number: String,
    pub class: String,
    pub driver_name: Option<String>,
    pub transponder_id: Option<String>,
}

/// A timing loop on the track, as configured by the relay (`SendLoopChange`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSection {
    pub name: String,
    pub is_in_pit: bool,
    pub is_pit_start_finish: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

/// Per-car live timing state, keyed by [`CarPosition::number`] within a
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarPosition {
    // Identity
    pub number: String,
    pub transponder_id: Option<String>,
    pub class: String,
    pub event_id: i64,
    pub session_id: i64,

    // Timing
    pub best_time_ms: Option<i64>,
    pub best_lap: Option<i32>,
    pub last_lap_time_ms: Option<i64>,
    pub last_lap_completed: i32,
    pub total_time_ms: Option<i64>,
    pub projected_lap_time_ms: Option<i64>,
    pub lap_start_time: Option<DateTime<Utc>>,

    // Position
    pub overall_position: i32,
    pub class_position: i32,
    pub overall_starting_position: i32,
    pub class_starting_position: i32,
    pub overall_gap: String,
    pub overall_difference: String,
    pub in_class_gap: String,
    pub in_class_difference: String,
    pub overall_positions_gained: i32,
    pub in_class_positions_gained: i32,
    pub is_best_time: bool,
    pub is_best_time_class: bool,
    pub is_overall_most_positions_gained: bool,
    pub is_class_most_positions_gained: bool,

    // Pit
    pub in_pit: bool,
    pub entered_pit: bool,
    pub exited_pit: bool,
    pub pit_start_finish: bool,
    pub lap_included_pit: bool,
    pub pit_stop_count: i32,
    pub last_lap_pitted: Option<i32>,

    // Flags
    pub track_flag: FlagKind,
    pub local_flag: FlagKind,
    pub lap_had_local_flag: bool,

    // Penalties
    pub penalty_laps: i32,
    pub penalty_warnings: i32,
    pub black_flags: i32,

    // Driver
    pub driver_name: Option<String>,
    pub driver_id: Option<String>,

    // Location
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub last_loop_name: Option<String>,

    pub completed_sections: Vec<SectionTime>,
    pub in_car_video: Option<InCarVideoStatus>,

    // Status
    pub current_status: CarStatus,
    pub is_stale: bool,
    pub impact_warning: bool,
}

impl CarPosition {
    pub fn new(event_id: i64, session_id: i64, number: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            transponder_id: None,
            class: class.into(),
            event_id,
            session_id,
            best_time_ms: None,
            best_lap: None,
            last_lap_time_ms: None,
            last_lap_completed: 0,
            total_time_ms: None,
            projected_lap_time_ms: None,
            lap_start_time: None,
            overall_position: 0,
            class_position: 0,
            overall_starting_position: 0,
            class_starting_position: 0,
            overall_gap: String::new(),
            overall_difference: String::new(),
            in_class_gap: String::new(),
            in_class_difference: String::new(),
            overall_positions_gained: INVALID,
            in_class_positions_gained: INVALID,
            is_best_time: false,
            is_best_time_class: false,
            is_overall_most_positions_gained: false,
            is_class_most_positions_gained: false,
            in_pit: false,
            entered_pit: false,
            exited_pit: false,
            pit_start_finish: false,
            lap_included_pit: false,
            pit_stop_count: 0,
            last_lap_pitted: None,
            track_flag: FlagKind::Unknown,
            local_flag: FlagKind::Unknown,
            lap_had_local_flag: false,
            penalty_laps: 0,
            penalty_warnings: 0,
            black_flags: 0,
            driver_name: None,
            driver_id: None,
            lat: None,
            lon: None,
            last_loop_name: None,
            completed_sections: Vec::new(),
            in_car_video: None,
            current_status: CarStatus::Unknown,
            is_stale: false,
            impact_warning: false,
        }
    }
}

/// The liveness state machine a session moves through from first contact to
/// archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLiveness {
    PreLive,
    Live,
    Stale,
    Ended,
}

/// The authoritative in-memory snapshot for one live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub event_id: i64,
    pub session_id: i64,
    pub liveness: SessionLiveness,

    pub laps_to_go: Option<i32>,
    pub time_to_go_ms: Option<i64>,
    pub running_race_time_ms: Option<i64>,
    pub local_time_of_day: Option<String>,

    pub current_flag: FlagKind,
    pub flag_durations: Vec<FlagDuration>,

    pub green_ms: i64,
    pub yellow_ms: i64,
    pub red_ms: i64,
    pub num_yellows: i32,
    pub average_race_speed: Option<f64>,
    pub lead_changes: i32,

    pub entries: Vec<Entry>,
    pub car_positions: Vec<CarPosition>,
    pub track_sections: Vec<TrackSection>,
    pub class_colors: HashMap<String, String>,
    pub announcements: Vec<Announcement>,

    pub last_updated: DateTime<Utc>,
}

impl SessionState {
    pub fn new(event_id: i64, session_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            session_id,
            liveness: SessionLiveness::PreLive,
            laps_to_go: None,
            time_to_go_ms: None,
            running_race_time_ms: None,
            local_time_of_day: None,
            current_flag: FlagKind::Unknown,
            flag_durations: Vec::new(),
            green_ms: 0,
            yellow_ms: 0,
            red_ms: 0,
            num_yellows: 0,
            average_race_speed: None,
            lead_changes: 0,
            entries: Vec::new(),
            car_positions: Vec::new(),
            track_sections: Vec::new(),
            class_colors: HashMap::new(),
            announcements: Vec::new(),
            last_updated: now,
        }
    }

    pub fn car(&self, number: &str) -> Option<&CarPosition> {
        self.car_positions.iter().find(|c| c.number == number)
    }

    pub fn car_mut(&mut self, number: &str) -> Option<&mut CarPosition> {
        self.car_positions.iter_mut().find(|c| c.number == number)
    }

    /// Inserts a car if absent, otherwise returns the existing entry. Keeps
    /// Keeps at most one entry per `number`.
    pub fn car_or_insert(&mut self, number: &str, class: &str) -> &mut CarPosition {
        if !self.car_positions.iter().any(|c| c.number == number) {
            self.car_positions
                .push(CarPosition::new(self.event_id, self.session_id, number, class));
        }
        self.car_mut(number).expect("just inserted")
    }

    pub fn total_cars(&self) -> usize {
        self.car_positions.len()
    }

    pub fn cars_in_class(&self, class: &str) -> usize {
        self.car_positions.iter().filter(|c| c.class == class).count()
    }
}
