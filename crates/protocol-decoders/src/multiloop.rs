//! The multiloop decoder for the hex-field loop-telemetry feed. Records
//! are semicolon-delimited with integer fields encoded in hex:
//!
//! ```text
//! ${RecordType};{N|R|U};{hex seq};{preamble};{field}...
//! ```
//!
//! `RecordType` is one of twelve single-letter codes (H, E, C, S, L, I, F,
//! N, R, T, A, V). The `N|R|U` flag marks New/Repeat/Update transmission
//! and is carried through but not otherwise interpreted — the decoder is
//! idempotent either way.
//!
//! Per-car completed-lap and section-crossing state lives in
//! [`MultiloopDecoder`] rather than in pure functions, because a completed
//! lap must clear that car's accumulated sections.

use crate::errors::MultiloopError;
use session_state::{CarPositionPatch, Entry, FlagKind, SectionTime, SessionState, SessionStatePatch, TrackSection};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    New,
    Repeat,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultiloopRecord {
    Heartbeat {
        green_ms: i64,
        yellow_ms: i64,
        red_ms: i64,
        num_yellows: i32,
        lead_changes: i32,
        average_race_speed: Option<f64>,
    },
    Entry {
        number: String,
        class: String,
        transponder_id: String,
    },
    CompletedLap {
        number: String,
        lap_number: i32,
        lap_time_ms: i64,
        total_time_ms: i64,
    },
    CompletedSection {
        number: String,
        section_name: String,
        section_time_ms: i64,
    },
    LineCrossing {
        number: String,
        loop_name: String,
        timestamp_ms: i64,
        is_in_pit: bool,
    },
    InvalidatedLap {
        number: String,
        lap_number: i32,
    },
    FlagInformation {
        flag: FlagKind,
        start_ms: i64,
        end_ms: Option<i64>,
    },
    NewLeader {
        number: String,
    },
    RunInformation {
        laps_to_go: Option<i32>,
        time_to_go_ms: Option<i64>,
    },
    TrackInformation {
        loop_name: String,
        is_in_pit: bool,
        is_pit_start_finish: bool,
    },
    Announcement {
        text: String,
    },
    Version {
        version: String,
    },
}

fn parse_hex_i64(field: &str) -> Result<i64, MultiloopError> {
    i64::from_str_radix(field.trim(), 16).map_err(|_| MultiloopError::InvalidHex(field.to_owned()))
}

fn parse_hex_bool(field: &str) -> Result<bool, MultiloopError> {
    Ok(parse_hex_i64(field)? != 0)
}

fn flag_from_code(code: &str) -> FlagKind {
    match code.trim().to_ascii_uppercase().as_str() {
        "G" => FlagKind::Green,
        "Y" => FlagKind::Yellow,
        "R" => FlagKind::Red,
        "W" => FlagKind::White,
        "C" => FlagKind::Checkered,
        "B" => FlagKind::Black,
        _ => FlagKind::Unknown,
    }
}

/// Parses one raw multiloop line. Stateless; see [`MultiloopDecoder::apply`]
/// for the stateful per-car bookkeeping.
pub fn decode_line(raw: &str) -> Result<MultiloopRecord, MultiloopError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let line = line.strip_prefix('$').ok_or(MultiloopError::MissingSigil)?;
    let parts: Vec<&str> = line.split(';').collect();
    if parts.len() < 4 {
        return Err(MultiloopError::MalformedHeader(raw.to_owned()));
    }
    let record_type = parts[0];
    let _transmission = match parts[1] {
        "N" => Transmission::New,
        "R" => Transmission::Repeat,
        "U" => Transmission::Update,
        other => return Err(MultiloopError::MalformedHeader(other.to_owned())),
    };
    let _seq = parse_hex_i64(parts[2])?;
    let preamble = parts[3];
    let rest = &parts[4..];

    let need = |n: usize| -> Result<(), MultiloopError> {
        if rest.len() < n {
            Err(MultiloopError::TooFewFields {
                record_type: record_type.to_owned(),
                expected: n,
                got: rest.len(),
            })
        } else {
            Ok(())
        }
    };

    match record_type {
        "H" => {
            need(5)?;
            Ok(MultiloopRecord::Heartbeat {
                green_ms: parse_hex_i64(rest[0])?,
                yellow_ms: parse_hex_i64(rest[1])?,
                red_ms: parse_hex_i64(rest[2])?,
                num_yellows: parse_hex_i64(rest[3])? as i32,
                lead_changes: parse_hex_i64(rest[4])? as i32,
                average_race_speed: rest.get(5).and_then(|s| s.parse::<f64>().ok()),
            })
        }
        "E" => {
            need(2)?;
            Ok(MultiloopRecord::Entry {
                number: preamble.to_owned(),
                class: rest[0].to_owned(),
                transponder_id: rest[1].to_owned(),
            })
        }
        "C" => {
            need(2)?;
            Ok(MultiloopRecord::CompletedLap {
                number: preamble.to_owned(),
                lap_number: parse_hex_i64(rest[0])? as i32,
                lap_time_ms: parse_hex_i64(rest[1])?,
                total_time_ms: *rest.get(2).map(|field| parse_hex_i64(field)).transpose()?.get_or_insert(0),
            })
        }
        "S" => {
            need(2)?;
            Ok(MultiloopRecord::CompletedSection {
                number: preamble.to_owned(),
                section_name: rest[0].to_owned(),
                section_time_ms: parse_hex_i64(rest[1])?,
            })
        }
        "L" => {
            need(2)?;
            Ok(MultiloopRecord::LineCrossing {
                number: preamble.to_owned(),
                loop_name: rest[0].to_owned(),
                timestamp_ms: parse_hex_i64(rest[1])?,
                is_in_pit: rest.get(2).map(|s| parse_hex_bool(s)).transpose()?.unwrap_or(false),
            })
        }
        "I" => {
            need(1)?;
            Ok(MultiloopRecord::InvalidatedLap {
                number: preamble.to_owned(),
                lap_number: parse_hex_i64(rest[0])? as i32,
            })
        }
        "F" => {
            need(1)?;
            Ok(MultiloopRecord::FlagInformation {
                flag: flag_from_code(preamble),
                start_ms: parse_hex_i64(rest[0])?,
                end_ms: match rest.get(1) {
                    Some(s) if !s.is_empty() => Some(parse_hex_i64(s)?),
                    _ => None,
                },
            })
        }
        "N" => Ok(MultiloopRecord::NewLeader {
            number: preamble.to_owned(),
        }),
        "R" => Ok(MultiloopRecord::RunInformation {
            laps_to_go: parse_hex_i64(preamble).ok().map(|v| v as i32),
            time_to_go_ms: rest.first().and_then(|s| parse_hex_i64(s).ok()),
        }),
        "T" => {
            need(2)?;
            Ok(MultiloopRecord::TrackInformation {
                loop_name: preamble.to_owned(),
                is_in_pit: parse_hex_bool(rest[0])?,
                is_pit_start_finish: parse_hex_bool(rest[1])?,
            })
        }
        "A" => Ok(MultiloopRecord::Announcement {
            text: preamble.to_owned(),
        }),
        "V" => Ok(MultiloopRecord::Version {
            version: preamble.to_owned(),
        }),
        other => Err(MultiloopError::UnknownRecordType(other.to_owned())),
    }
}

pub enum MultiloopEffect {
    Session(SessionStatePatch),
    Car(CarPositionPatch),
    /// `CompletedSection` clears the car's section map; the pipeline's lap
    /// processor is notified separately via `SectionStateUpdate`.
    SectionStateUpdate { number: String },
    None,
}

/// Holds the per-car caches this decoder needs: the latest completed lap
/// and the in-progress section crossings since that lap.
#[derive(Default)]
pub struct MultiloopDecoder {
    latest_completed_lap: HashMap<String, i32>,
    sections_since_lap: HashMap<String, Vec<SectionTime>>,
}

impl MultiloopDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, record: &MultiloopRecord, state: &mut SessionState) -> MultiloopEffect {
        match record {
            MultiloopRecord::Heartbeat {
                green_ms,
                yellow_ms,
                red_ms,
                num_yellows,
                lead_changes,
                average_race_speed,
            } => {
                let mut patch = SessionStatePatch::identity(state.session_id);
                if state.green_ms != *green_ms {
                    patch.green_ms = Some(*green_ms);
                    state.green_ms = *green_ms;
                }
                if state.yellow_ms != *yellow_ms {
                    patch.yellow_ms = Some(*yellow_ms);
                    state.yellow_ms = *yellow_ms;
                }
                if state.red_ms != *red_ms {
                    patch.red_ms = Some(*red_ms);
                    state.red_ms = *red_ms;
                }
                if state.num_yellows != *num_yellows {
                    patch.num_yellows = Some(*num_yellows);
                    state.num_yellows = *num_yellows;
                }
                if state.lead_changes != *lead_changes {
                    patch.lead_changes = Some(*lead_changes);
                    state.lead_changes = *lead_changes;
                }
                if state.average_race_speed != *average_race_speed {
                    patch.average_race_speed = Some(*average_race_speed);
                    state.average_race_speed = *average_race_speed;
                }
                if patch.is_empty() {
                    MultiloopEffect::None
                } else {
                    MultiloopEffect::Session(patch)
                }
            }
            MultiloopRecord::Entry {
                number,
                class,
                transponder_id,
            } => {
                if !state.entries.iter().any(|e| &e.number == number) {
                    state.entries.push(Entry {
                        number: number.clone(),
                        class: class.clone(),
                        driver_name: None,
                        transponder_id: Some(transponder_id.clone()),
                    });
                    let mut patch = SessionStatePatch::identity(state.session_id);
                    patch.entries = Some(state.entries.clone());
                    MultiloopEffect::Session(patch)
                } else {
                    MultiloopEffect::None
                }
            }
            MultiloopRecord::CompletedLap {
                number,
                lap_number,
                lap_time_ms,
                total_time_ms,
            } => {
                self.latest_completed_lap.insert(number.clone(), *lap_number);
                self.sections_since_lap.remove(number);

                let car = state.car_or_insert(number, "");
                let prior = car.clone();
                car.last_lap_completed = *lap_number;
                car.last_lap_time_ms = Some(*lap_time_ms);
                if *total_time_ms != 0 {
                    car.total_time_ms = Some(*total_time_ms);
                }
                if car.best_time_ms.map(|b| *lap_time_ms < b).unwrap_or(true) {
                    car.best_time_ms = Some(*lap_time_ms);
                    car.best_lap = Some(*lap_number);
                }
                car.completed_sections.clear();

                match session_state::diff_car(&prior, car) {
                    Some(patch) => MultiloopEffect::Car(patch),
                    None => MultiloopEffect::None,
                }
            }
            MultiloopRecord::CompletedSection {
                number,
                section_name,
                section_time_ms,
            } => {
                let sections = self.sections_since_lap.entry(number.clone()).or_default();
                sections.push(SectionTime {
                    name: section_name.clone(),
                    time_ms: *section_time_ms,
                });

                let car = state.car_or_insert(number, "");
                let prior = car.clone();
                car.completed_sections = sections.clone();
                match session_state::diff_car(&prior, car) {
                    Some(patch) => {
                        let _ = patch;
                        MultiloopEffect::SectionStateUpdate {
                            number: number.clone(),
                        }
                    }
                    None => MultiloopEffect::None,
                }
            }
            MultiloopRecord::LineCrossing {
                number,
                loop_name,
                timestamp_ms: _,
                is_in_pit,
            } => {
                let car = state.car_or_insert(number, "");
                let prior = car.clone();
                car.last_loop_name = Some(loop_name.clone());
                car.in_pit = *is_in_pit;
                match session_state::diff_car(&prior, car) {
                    Some(patch) => MultiloopEffect::Car(patch),
                    None => MultiloopEffect::None,
                }
            }
            MultiloopRecord::InvalidatedLap { number, lap_number } => {
                if self.latest_completed_lap.get(number) == Some(lap_number) {
                    self.latest_completed_lap.remove(number);
                }
                let car = state.car_or_insert(number, "");
                let prior = car.clone();
                if car.last_lap_completed == *lap_number {
                    car.last_lap_completed -= 1;
                }
                match session_state::diff_car(&prior, car) {
                    Some(patch) => MultiloopEffect::Car(patch),
                    None => MultiloopEffect::None,
                }
            }
            MultiloopRecord::FlagInformation { .. } => MultiloopEffect::None,
            MultiloopRecord::NewLeader { .. } => MultiloopEffect::None,
            MultiloopRecord::RunInformation {
                laps_to_go,
                time_to_go_ms,
            } => {
                let mut patch = SessionStatePatch::identity(state.session_id);
                if state.laps_to_go != *laps_to_go {
                    patch.laps_to_go = Some(*laps_to_go);
                    state.laps_to_go = *laps_to_go;
                }
                if state.time_to_go_ms != *time_to_go_ms {
                    patch.time_to_go_ms = Some(*time_to_go_ms);
                    state.time_to_go_ms = *time_to_go_ms;
                }
                if patch.is_empty() {
                    MultiloopEffect::None
                } else {
                    MultiloopEffect::Session(patch)
                }
            }
            MultiloopRecord::TrackInformation {
                loop_name,
                is_in_pit,
                is_pit_start_finish,
            } => {
                let existing = state.track_sections.iter_mut().find(|s| &s.name == loop_name);
                match existing {
                    Some(section)
                        if section.is_in_pit == *is_in_pit
                            && section.is_pit_start_finish == *is_pit_start_finish =>
                    {
                        MultiloopEffect::None
                    }
                    Some(section) => {
                        section.is_in_pit = *is_in_pit;
                        section.is_pit_start_finish = *is_pit_start_finish;
                        let mut patch = SessionStatePatch::identity(state.session_id);
                        patch.track_sections = Some(state.track_sections.clone());
                        MultiloopEffect::Session(patch)
                    }
                    None => {
                        state.track_sections.push(TrackSection {
                            name: loop_name.clone(),
                            is_in_pit: *is_in_pit,
                            is_pit_start_finish: *is_pit_start_finish,
                        });
                        let mut patch = SessionStatePatch::identity(state.session_id);
                        patch.track_sections = Some(state.track_sections.clone());
                        MultiloopEffect::Session(patch)
                    }
                }
            }
            MultiloopRecord::Announcement { text } => {
                state.announcements.push(session_state::Announcement {
                    text: text.clone(),
                    posted_at: state.last_updated,
                });
                let mut patch = SessionStatePatch::identity(state.session_id);
                patch.announcements = Some(state.announcements.clone());
                MultiloopEffect::Session(patch)
            }
            MultiloopRecord::Version { .. } => MultiloopEffect::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::SessionState;

    #[test]
    fn decodes_heartbeat_hex_fields() {
        let record = decode_line("$H;N;1;0;3e8;1f4;0;1;2;142.5").unwrap();
        assert_eq!(
            record,
            MultiloopRecord::Heartbeat {
                green_ms: 1000,
                yellow_ms: 500,
                red_ms: 0,
                num_yellows: 1,
                lead_changes: 2,
                average_race_speed: Some(142.5),
            }
        );
    }

    #[test]
    fn completed_lap_clears_sections_and_updates_best_time() {
        let mut decoder = MultiloopDecoder::new();
        let mut state = SessionState::new(1, 10, Utc::now());

        let section = decode_line("$S;N;2;42;sector1;64").unwrap();
        decoder.apply(&section, &mut state);
        assert_eq!(state.car("42").unwrap().completed_sections.len(), 1);

        let lap = decode_line("$C;N;3;42;a;ea60;927c0").unwrap();
        let effect = decoder.apply(&lap, &mut state);
        assert!(matches!(effect, MultiloopEffect::Car(_)));
        let car = state.car("42").unwrap();
        assert_eq!(car.last_lap_completed, 10);
        assert_eq!(car.last_lap_time_ms, Some(60_000));
        assert!(car.completed_sections.is_empty());
    }

    #[test]
    fn rejects_short_records() {
        assert!(matches!(
            decode_line("$H;N;1;0"),
            Err(MultiloopError::TooFewFields { .. })
        ));
    }
}
