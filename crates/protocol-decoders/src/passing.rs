//! Decoders for the structured transponder-passing and loop-definition
//! feeds. Unlike result-monitor and multiloop these arrive already-parsed
//! as arrays from the relay, so there is no line syntax to reject — only
//! domain mapping (transponder → car number) and pit-state bookkeeping.

use session_state::{CarPositionPatch, SessionState, SessionStatePatch, TrackSection};
pub use timing_protocol::{Loop, Passing};

pub enum PassingEffect {
    Car(CarPositionPatch),
    /// Resent passings that map to no known transponder are dropped silently.
    None,
}

/// Maps a passing to its car via the entry table's `transponder_id`, then
/// updates pit pulses: `enteredPit`/`exitedPit` are true only on the patch
/// that records the transition, `pitStopCount` increments on exit, and
/// `lapIncludedPit` is set for the lap during which any in-pit crossing
/// occurred.
pub fn apply_passing(passing: &Passing, state: &mut SessionState) -> PassingEffect {
    if passing.is_resend {
        return PassingEffect::None;
    }
    let Some(number) = state
        .entries
        .iter()
        .find(|e| e.transponder_id.as_deref() == Some(passing.transponder_id.as_str()))
        .map(|e| e.number.clone())
    else {
        return PassingEffect::None;
    };

    let class = state
        .entries
        .iter()
        .find(|e| e.number == number)
        .map(|e| e.class.clone())
        .unwrap_or_default();
    let car = state.car_or_insert(&number, &class);
    let prior = car.clone();
    let was_in_pit = car.in_pit;

    car.in_pit = passing.is_in_pit;
    car.entered_pit = !was_in_pit && passing.is_in_pit;
    car.exited_pit = was_in_pit && !passing.is_in_pit;
    if car.entered_pit || was_in_pit {
        car.lap_included_pit = true;
    }
    if car.exited_pit {
        car.pit_stop_count += 1;
        car.last_lap_pitted = Some(car.last_lap_completed + 1);
    }

    match session_state::diff_car(&prior, car) {
        Some(patch) => PassingEffect::Car(patch),
        None => PassingEffect::None,
    }
}

pub enum LoopEffect {
    Session(SessionStatePatch),
    None,
}

pub fn apply_loop(loop_def: &Loop, state: &mut SessionState) -> LoopEffect {
    let existing = state.track_sections.iter_mut().find(|s| s.name == loop_def.name);
    match existing {
        Some(section)
            if section.is_in_pit == loop_def.is_in_pit
                && section.is_pit_start_finish == loop_def.is_pit_start_finish =>
        {
            LoopEffect::None
        }
        Some(section) => {
            section.is_in_pit = loop_def.is_in_pit;
            section.is_pit_start_finish = loop_def.is_pit_start_finish;
            let mut patch = SessionStatePatch::identity(state.session_id);
            patch.track_sections = Some(state.track_sections.clone());
            LoopEffect::Session(patch)
        }
        None => {
            state.track_sections.push(TrackSection {
                name: loop_def.name.clone(),
                is_in_pit: loop_def.is_in_pit,
                is_pit_start_finish: loop_def.is_pit_start_finish,
            });
            let mut patch = SessionStatePatch::identity(state.session_id);
            patch.track_sections = Some(state.track_sections.clone());
            LoopEffect::Session(patch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::{Entry, SessionState};

    fn state_with_entry() -> SessionState {
        let mut state = SessionState::new(1, 10, Utc::now());
        state.entries.push(Entry {
            number: "42".to_owned(),
            class: "GT3".to_owned(),
            driver_name: None,
            transponder_id: Some("TX1".to_owned()),
        });
        state
    }

    #[test]
    fn pit_stop_cycle_produces_one_enter_and_one_exit_pulse() {
        let mut state = state_with_entry();

        let enter = Passing {
            transponder_id: "TX1".to_owned(),
            timestamp: Utc::now(),
            is_in_pit: true,
            is_resend: false,
        };
        let effect = apply_passing(&enter, &mut state);
        let patch = match effect {
            PassingEffect::Car(p) => p,
            PassingEffect::None => panic!("expected a patch"),
        };
        assert_eq!(patch.entered_pit, Some(true));
        assert_eq!(state.car("42").unwrap().entered_pit, true);

        let exit = Passing {
            transponder_id: "TX1".to_owned(),
            timestamp: Utc::now(),
            is_in_pit: false,
            is_resend: false,
        };
        apply_passing(&exit, &mut state);
        let car = state.car("42").unwrap();
        assert!(car.exited_pit);
        assert_eq!(car.pit_stop_count, 1);
        assert!(car.lap_included_pit);
        assert_eq!(car.last_lap_pitted, Some(1));
    }

    #[test]
    fn resend_passings_are_dropped() {
        let mut state = state_with_entry();
        let resend = Passing {
            transponder_id: "TX1".to_owned(),
            timestamp: Utc::now(),
            is_in_pit: true,
            is_resend: true,
        };
        assert!(matches!(apply_passing(&resend, &mut state), PassingEffect::None));
    }
}
