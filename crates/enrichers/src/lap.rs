//! Detects lap completions so the pipeline can persist a per-lap snapshot
//! and notify the in-car driver-mode processor.

use chrono::{DateTime, Utc};
use session_state::CarPosition;

#[derive(Debug, Clone, PartialEq)]
pub struct LapCompletionEvent {
    pub number: String,
    pub lap_number: i32,
    pub lap_time_ms: Option<i64>,
    pub total_time_ms: Option<i64>,
    pub lap_included_pit: bool,
    pub completed_at: DateTime<Utc>,
}

/// Fires when `car.last_lap_completed` has advanced past `prior_lap`.
/// `lap_included_pit` carries whatever the pit processor set during the lap
/// just completed (it runs before this in the fixed enricher order), then
/// the flag is cleared on `car` so the new lap starts clean.
pub fn detect(prior_lap: i32, car: &mut CarPosition, now: DateTime<Utc>) -> Option<LapCompletionEvent> {
    if car.last_lap_completed <= prior_lap {
        return None;
    }
    let event = LapCompletionEvent {
        number: car.number.clone(),
        lap_number: car.last_lap_completed,
        lap_time_ms: car.last_lap_time_ms,
        total_time_ms: car.total_time_ms,
        lap_included_pit: car.lap_included_pit,
        completed_at: now,
    };
    car.lap_included_pit = false;
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::CarPosition;

    #[test]
    fn advancing_lap_count_fires_an_event() {
        let mut car = CarPosition::new(1, 10, "42", "GT3");
        car.last_lap_completed = 5;
        car.lap_included_pit = true;
        let event = detect(4, &mut car, Utc::now()).expect("lap advanced");
        assert_eq!(event.lap_number, 5);
        assert!(event.lap_included_pit);
    }

    #[test]
    fn unchanged_lap_count_does_not_fire() {
        let mut car = CarPosition::new(1, 10, "42", "GT3");
        car.last_lap_completed = 5;
        assert!(detect(5, &mut car, Utc::now()).is_none());
    }

    #[test]
    fn firing_an_event_clears_lap_included_pit_for_the_new_lap() {
        let mut car = CarPosition::new(1, 10, "42", "GT3");
        car.last_lap_completed = 5;
        car.lap_included_pit = true;
        let event = detect(4, &mut car, Utc::now()).expect("lap advanced");
        assert!(event.lap_included_pit);
        assert!(!car.lap_included_pit);
    }
}
