//! Applies parsed control-log entries (sourced from an external race
//! control feed, cached upstream) as penalty increments.

use session_state::{CarPositionPatch, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub struct ControlLogEntry {
    pub text: String,
    pub cars_mentioned: Vec<String>,
    /// The car explicitly called out in the entry, if any. Multi-car
    /// entries apply the penalty only to this car.
    pub highlighted_car: Option<String>,
}

fn extract_lap_penalty(text: &str) -> Option<i32> {
    let lower = text.to_ascii_lowercase();
    let idx = lower.find("lap")?;
    let before = lower[..idx].trim_end();
    let digits: String = before
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    digits.parse::<i32>().ok()
}

/// Applies one control-log entry to the target car, returning a patch if
/// any penalty counter changed. Entries that name no car are dropped.
pub fn apply_entry(entry: &ControlLogEntry, state: &mut SessionState) -> Option<CarPositionPatch> {
    let target = entry
        .highlighted_car
        .clone()
        .or_else(|| entry.cars_mentioned.first().cloned())?;

    let class = state
        .entries
        .iter()
        .find(|e| e.number == target)
        .map(|e| e.class.clone())
        .unwrap_or_default();
    let car = state.car_or_insert(&target, &class);
    let prior = car.clone();

    let lower = entry.text.to_ascii_lowercase();
    if lower.contains("warning") {
        car.penalty_warnings += 1;
    }
    if let Some(laps) = extract_lap_penalty(&entry.text) {
        car.penalty_laps += laps;
    }
    if lower.contains("drive through") {
        car.black_flags += 1;
    }

    session_state::diff_car(&prior, car)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::SessionState;

    #[test]
    fn warning_increments_penalty_warnings() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let entry = ControlLogEntry {
            text: "Car 42 - warning for blocking".to_owned(),
            cars_mentioned: vec!["42".to_owned()],
            highlighted_car: None,
        };
        let patch = apply_entry(&entry, &mut state).expect("penalty applied");
        assert_eq!(patch.penalty_warnings, Some(1));
    }

    #[test]
    fn lap_penalty_text_is_parsed() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let entry = ControlLogEntry {
            text: "Car 7 - 2 lap penalty for avoidable contact".to_owned(),
            cars_mentioned: vec!["7".to_owned()],
            highlighted_car: None,
        };
        let patch = apply_entry(&entry, &mut state).expect("penalty applied");
        assert_eq!(patch.penalty_laps, Some(2));
    }

    #[test]
    fn multi_car_entry_applies_only_to_highlighted_car() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let entry = ControlLogEntry {
            text: "Contact between 9 and 12, drive through for 12".to_owned(),
            cars_mentioned: vec!["9".to_owned(), "12".to_owned()],
            highlighted_car: Some("12".to_owned()),
        };
        apply_entry(&entry, &mut state);
        assert_eq!(state.car("12").unwrap().black_flags, 1);
        assert!(state.car("9").is_none());
    }
}
