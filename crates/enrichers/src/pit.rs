//! Pit-state re-sync, run after a configuration-change notification
//! (a loop is reclassified as in-pit/not-in-pit, or the track map changes).
//! Per-crossing enter/exit pulses are computed inline by the decoders that
//! see each passing/line-crossing event; this module only re-derives
//! steady-state `in_pit` from the latest known crossing for every car.

use session_state::{CarPositionPatch, SessionState};

pub fn resync(state: &mut SessionState) -> Vec<CarPositionPatch> {
    let in_pit_loops: std::collections::HashSet<&str> = state
        .track_sections
        .iter()
        .filter(|s| s.is_in_pit)
        .map(|s| s.name.as_str())
        .collect();

    let mut patches = Vec::new();
    for car in state.car_positions.iter_mut() {
        let prior = car.clone();
        let should_be_in_pit = car
            .last_loop_name
            .as_deref()
            .map(|name| in_pit_loops.contains(name))
            .unwrap_or(car.in_pit);
        car.entered_pit = !prior.in_pit && should_be_in_pit;
        car.exited_pit = prior.in_pit && !should_be_in_pit;
        if car.exited_pit {
            car.pit_stop_count += 1;
        }
        car.in_pit = should_be_in_pit;
        if let Some(patch) = session_state::diff_car(&prior, car) {
            patches.push(patch);
        }
    }
    patches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::{CarPosition, SessionState, TrackSection};

    #[test]
    fn reclassifying_a_loop_as_in_pit_pulses_entered_for_cars_last_seen_there() {
        let mut state = SessionState::new(1, 10, Utc::now());
        state.track_sections.push(TrackSection {
            name: "pit-lane".to_owned(),
            is_in_pit: true,
            is_pit_start_finish: false,
        });
        let mut car = CarPosition::new(1, 10, "42", "GT3");
        car.last_loop_name = Some("pit-lane".to_owned());
        car.in_pit = false;
        state.car_positions.push(car);

        let patches = resync(&mut state);
        assert_eq!(patches.len(), 1);
        assert_eq!(state.car("42").unwrap().in_pit, true);
        assert_eq!(state.car("42").unwrap().entered_pit, true);
    }
}
