//! The result-monitor decoder: line-oriented ASCII records beginning with
//! a `$`-prefixed command code. Newlines are already stripped by the
//! relay; this module re-strips defensively.

use crate::csv::{non_empty, parse_seconds_to_ms, split_fields};
use crate::errors::RMonitorError;
use session_state::{CarPositionPatch, FlagKind, SessionState, SessionStatePatch};

#[derive(Debug, Clone, PartialEq)]
pub enum RMonitorRecord {
    /// `$F,<flag>,<lapsToGo>,<timeToGoSeconds>`
    Heartbeat {
        flag: FlagKind,
        laps_to_go: Option<i32>,
        time_to_go_ms: Option<i64>,
    },
    /// `$G,<classId>,<className>`
    ClassDefinition { class_id: String, class_name: String },
    /// `$E,<number>,<classId>,<driverName>,<transponderId>`
    CompetitorEntry {
        number: String,
        class_id: String,
        driver_name: Option<String>,
        transponder_id: Option<String>,
    },
    /// `$H,<number>,<overallPosition>,<laps>,<lastLapTime>,<bestTime>,<totalTime>,<transponderId>`
    CarUpdate {
        number: String,
        overall_position: i32,
        laps: Option<i32>,
        last_lap_time_ms: Option<i64>,
        best_time_ms: Option<i64>,
        total_time_ms: Option<i64>,
        transponder_id: Option<String>,
    },
}

fn flag_from_code(code: &str) -> FlagKind {
    match code.trim().to_ascii_uppercase().as_str() {
        "G" | "GREEN" => FlagKind::Green,
        "Y" | "YELLOW" => FlagKind::Yellow,
        "R" | "RED" => FlagKind::Red,
        "W" | "WHITE" => FlagKind::White,
        "C" | "CHECKERED" | "CHECKER" => FlagKind::Checkered,
        "B" | "BLACK" => FlagKind::Black,
        _ => FlagKind::Unknown,
    }
}

fn field(fields: &[String], idx: usize) -> &str {
    fields.get(idx).map(String::as_str).unwrap_or("")
}

fn require(fields: &[String], code: &str, expected: usize) -> Result<(), RMonitorError> {
    if fields.len() < expected {
        Err(RMonitorError::TooFewFields {
            code: code.to_owned(),
            expected,
            got: fields.len(),
        })
    } else {
        Ok(())
    }
}

/// Parses one raw line into a structured record. Unknown record codes and
/// malformed records are reported as errors; the caller (the pipeline) is
/// responsible for logging and skipping rather than aborting the feed.
pub fn decode_line(raw: &str) -> Result<RMonitorRecord, RMonitorError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let line = line.strip_prefix('$').ok_or(RMonitorError::MissingSigil)?;
    let fields = split_fields(line);
    let code = field(&fields, 0).to_owned();

    match code.as_str() {
        "F" => {
            require(&fields, "F", 4)?;
            Ok(RMonitorRecord::Heartbeat {
                flag: flag_from_code(field(&fields, 1)),
                laps_to_go: field(&fields, 2).trim().parse::<i32>().ok(),
                time_to_go_ms: parse_seconds_to_ms(field(&fields, 3)),
            })
        }
        "G" => {
            require(&fields, "G", 3)?;
            Ok(RMonitorRecord::ClassDefinition {
                class_id: field(&fields, 1).trim().to_owned(),
                class_name: field(&fields, 2).trim().to_owned(),
            })
        }
        "E" => {
            require(&fields, "E", 3)?;
            Ok(RMonitorRecord::CompetitorEntry {
                number: field(&fields, 1).trim().to_owned(),
                class_id: field(&fields, 2).trim().to_owned(),
                driver_name: non_empty(field(&fields, 3)),
                transponder_id: non_empty(field(&fields, 4)),
            })
        }
        "H" => {
            require(&fields, "H", 3)?;
            Ok(RMonitorRecord::CarUpdate {
                number: field(&fields, 1).trim().to_owned(),
                overall_position: field(&fields, 2).trim().parse::<i32>().unwrap_or(0),
                laps: field(&fields, 3).trim().parse::<i32>().ok(),
                last_lap_time_ms: parse_seconds_to_ms(field(&fields, 4)),
                best_time_ms: parse_seconds_to_ms(field(&fields, 5)),
                total_time_ms: parse_seconds_to_ms(field(&fields, 6)),
                transponder_id: non_empty(field(&fields, 7)),
            })
        }
        other => Err(RMonitorError::UnknownCode(other.to_owned())),
    }
}

/// The result of applying one decoded record to the session state: either a
/// session-level patch (heartbeat, class/entry bookkeeping) or a car patch
/// (per-car update) that the pipeline forwards into the secondary
/// enrichers.
pub enum RMonitorEffect {
    Session(SessionStatePatch),
    Car(CarPositionPatch),
    None,
}

/// Mutates `state` in place per the decoded record and returns the sparse
/// delta, following the diff/apply contract of [`session_state::patch`].
pub fn apply(record: &RMonitorRecord, state: &mut SessionState) -> RMonitorEffect {
    match record {
        RMonitorRecord::Heartbeat {
            flag,
            laps_to_go,
            time_to_go_ms,
        } => {
            let mut patch = SessionStatePatch::identity(state.session_id);
            if state.current_flag != *flag {
                patch.current_flag = Some(*flag);
                state.current_flag = *flag;
            }
            if state.laps_to_go != *laps_to_go {
                patch.laps_to_go = Some(*laps_to_go);
                state.laps_to_go = *laps_to_go;
            }
            if state.time_to_go_ms != *time_to_go_ms {
                patch.time_to_go_ms = Some(*time_to_go_ms);
                state.time_to_go_ms = *time_to_go_ms;
            }
            if patch.is_empty() {
                RMonitorEffect::None
            } else {
                RMonitorEffect::Session(patch)
            }
        }
        RMonitorRecord::ClassDefinition { class_id, class_name } => {
            let mut patch = SessionStatePatch::identity(state.session_id);
            let changed = state
                .class_colors
                .get(class_id)
                .map(|v| v != class_name)
                .unwrap_or(true);
            if changed {
                state
                    .class_colors
                    .entry(class_id.clone())
                    .or_insert_with(|| class_name.clone());
                patch.class_colors = Some(state.class_colors.clone());
                RMonitorEffect::Session(patch)
            } else {
                RMonitorEffect::None
            }
        }
        RMonitorRecord::CompetitorEntry {
            number,
            class_id,
            driver_name,
            transponder_id,
        } => {
            if !state.entries.iter().any(|e| &e.number == number) {
                state.entries.push(session_state::Entry {
                    number: number.clone(),
                    class: class_id.clone(),
                    driver_name: driver_name.clone(),
                    transponder_id: transponder_id.clone(),
                });
                let mut patch = SessionStatePatch::identity(state.session_id);
                patch.entries = Some(state.entries.clone());
                RMonitorEffect::Session(patch)
            } else {
                RMonitorEffect::None
            }
        }
        RMonitorRecord::CarUpdate {
            number,
            overall_position,
            laps,
            last_lap_time_ms,
            best_time_ms,
            total_time_ms,
            transponder_id,
        } => {
            let class = state
                .entries
                .iter()
                .find(|e| &e.number == number)
                .map(|e| e.class.clone())
                .unwrap_or_default();
            let car = state.car_or_insert(number, &class);
            let prior = car.clone();

            car.overall_position = *overall_position;
            if let Some(laps) = laps {
                car.last_lap_completed = *laps;
            }
            if last_lap_time_ms.is_some() {
                car.last_lap_time_ms = *last_lap_time_ms;
            }
            if let Some(bt) = best_time_ms {
                if car.best_time_ms.map(|cur| *bt < cur).unwrap_or(true) {
                    car.best_time_ms = Some(*bt);
                }
            }
            if total_time_ms.is_some() {
                car.total_time_ms = *total_time_ms;
            }
            if transponder_id.is_some() {
                car.transponder_id = transponder_id.clone();
            }

            match session_state::diff_car(&prior, car) {
                Some(patch) => RMonitorEffect::Car(patch),
                None => RMonitorEffect::None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::SessionState;

    #[test]
    fn decodes_heartbeat() {
        let record = decode_line("$F,G,45,1200.5\r\n").unwrap();
        assert_eq!(
            record,
            RMonitorRecord::Heartbeat {
                flag: FlagKind::Green,
                laps_to_go: Some(45),
                time_to_go_ms: Some(1_200_500),
            }
        );
    }

    #[test]
    fn decodes_class_and_car_update() {
        let class = decode_line("$G,1,GT3").unwrap();
        assert_eq!(
            class,
            RMonitorRecord::ClassDefinition {
                class_id: "1".to_owned(),
                class_name: "GT3".to_owned(),
            }
        );

        let update = decode_line("$H,42,1,10,61.234,60.001,600.000,TX123").unwrap();
        assert_eq!(
            update,
            RMonitorRecord::CarUpdate {
                number: "42".to_owned(),
                overall_position: 1,
                laps: Some(10),
                last_lap_time_ms: Some(61_234),
                best_time_ms: Some(60_001),
                total_time_ms: Some(600_000),
                transponder_id: Some("TX123".to_owned()),
            }
        );
    }

    #[test]
    fn rejects_missing_sigil_and_unknown_code() {
        assert_eq!(decode_line("F,G,1,1"), Err(RMonitorError::MissingSigil));
        assert_eq!(
            decode_line("$Z,1,2"),
            Err(RMonitorError::UnknownCode("Z".to_owned()))
        );
    }

    #[test]
    fn car_update_applies_three_car_scenario_totals() {
        let mut state = SessionState::new(1, 10, Utc::now());
        for (num, pos, total) in [("1", 1, "600.000"), ("2", 2, "601.000"), ("3", 3, "602.000")] {
            let line = format!("$H,{num},{pos},1,{total},{total},{total},");
            let record = decode_line(&line).unwrap();
            apply(&record, &mut state);
        }
        assert_eq!(state.car("1").unwrap().total_time_ms, Some(600_000));
        assert_eq!(state.car("3").unwrap().total_time_ms, Some(602_000));
    }
}
