//! Validation of the consistency rules that must hold after every write.

use crate::model::SessionState;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("duplicate car number {0:?} in carPositions")]
    DuplicateCarNumber(String),
    #[error("overallPosition values are not a prefix of 1..N (gap at {0})")]
    PositionConsistency(i32),
    #[error("flag kind {0:?} has more than one open (end_time=None) duration")]
    MultipleOpenFlagDurations(String),
    #[error("flag duration for {kind:?} has start_time > end_time")]
    FlagDurationOutOfOrder { kind: String },
    #[error("car {0:?} classPosition does not match its rank within class")]
    ClassPositionMismatch(String),
    #[error("car {0:?} pitStopCount decreased")]
    PitStopCountDecreased(String),
}

/// Runs every structural check against a session snapshot. The patch
/// round-trip property is exercised as a test property in `patch.rs`
/// rather than checked at runtime since it spans two snapshots. Pass the
/// pre-pass snapshot as `prior` to additionally check the
/// `pitStopCount` monotonicity invariant, which cannot be decided from a
/// single snapshot.
pub fn validate(state: &SessionState, prior: Option<&SessionState>) -> Result<(), InvariantViolation> {
    check_unique_numbers(state)?;
    check_position_consistency(state)?;
    check_flag_durations(state)?;
    check_class_positions(state)?;
    check_positions_gained_bounds(state)?;
    if let Some(prior) = prior {
        check_pit_stop_count_monotonic(state, prior)?;
    }
    Ok(())
}

fn check_unique_numbers(state: &SessionState) -> Result<(), InvariantViolation> {
    let mut seen = HashSet::new();
    for car in &state.car_positions {
        if !seen.insert(&car.number) {
            return Err(InvariantViolation::DuplicateCarNumber(car.number.clone()));
        }
    }
    Ok(())
}

/// Non-zero `overall_position` values must form a contiguous prefix of 1..N.
fn check_position_consistency(state: &SessionState) -> Result<(), InvariantViolation> {
    let mut positions: Vec<i32> = state
        .car_positions
        .iter()
        .map(|c| c.overall_position)
        .filter(|&p| p != 0)
        .collect();
    positions.sort_unstable();
    for (idx, pos) in positions.iter().enumerate() {
        let expected = idx as i32 + 1;
        if *pos != expected {
            return Err(InvariantViolation::PositionConsistency(expected));
        }
    }
    Ok(())
}

fn check_flag_durations(state: &SessionState) -> Result<(), InvariantViolation> {
    let mut open_seen: HashSet<String> = HashSet::new();
    for fd in &state.flag_durations {
        let kind_key = format!("{:?}", fd.flag);
        match fd.end_time {
            Some(end) if end < fd.start_time => {
                return Err(InvariantViolation::FlagDurationOutOfOrder { kind: kind_key });
            }
            None => {
                if !open_seen.insert(kind_key.clone()) {
                    return Err(InvariantViolation::MultipleOpenFlagDurations(kind_key));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_class_positions(state: &SessionState) -> Result<(), InvariantViolation> {
    let mut by_class: HashMap<&str, Vec<&crate::model::CarPosition>> = HashMap::new();
    for car in &state.car_positions {
        by_class.entry(car.class.as_str()).or_default().push(car);
    }
    for cars in by_class.values() {
        let mut ranked: Vec<&&crate::model::CarPosition> = cars
            .iter()
            .filter(|c| c.overall_position != 0)
            .collect();
        ranked.sort_unstable_by_key(|c| c.overall_position);
        for (idx, car) in ranked.iter().enumerate() {
            let expected = idx as i32 + 1;
            if car.class_position != 0 && car.class_position != expected {
                return Err(InvariantViolation::ClassPositionMismatch(car.number.clone()));
            }
        }
    }
    Ok(())
}

/// `overallPositionsGained`/`inClassPositionsGained` (when computed) must be
/// an achievable delta: a car cannot gain or lose more positions than there
/// are cars in the session.
fn check_positions_gained_bounds(state: &SessionState) -> Result<(), InvariantViolation> {
    let total = state.car_positions.len() as i32;
    for car in &state.car_positions {
        for gained in [car.overall_positions_gained, car.in_class_positions_gained] {
            if gained != crate::model::INVALID && gained.abs() >= total.max(1) {
                return Err(InvariantViolation::PositionConsistency(gained));
            }
        }
    }
    Ok(())
}

/// `pitStopCount` is a cumulative counter derived from loop topology; it
/// must never decrease between two snapshots of the same car.
fn check_pit_stop_count_monotonic(state: &SessionState, prior: &SessionState) -> Result<(), InvariantViolation> {
    for car in &state.car_positions {
        if let Some(before) = prior.car(&car.number) {
            if car.pit_stop_count < before.pit_stop_count {
                return Err(InvariantViolation::PitStopCountDecreased(car.number.clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CarPosition, SessionState};
    use chrono::Utc;

    fn state_with_positions(positions: &[i32]) -> SessionState {
        let mut state = SessionState::new(1, 10, Utc::now());
        for (i, &pos) in positions.iter().enumerate() {
            let mut car = CarPosition::new(1, 10, i.to_string(), "GT3");
            car.overall_position = pos;
            car.class_position = pos;
            state.car_positions.push(car);
        }
        state
    }

    #[test]
    fn contiguous_prefix_is_valid() {
        let state = state_with_positions(&[1, 2, 3]);
        assert!(validate(&state, None).is_ok());
    }

    #[test]
    fn zeros_are_ignored() {
        let state = state_with_positions(&[0, 1, 2]);
        assert!(validate(&state, None).is_ok());
    }

    #[test]
    fn gap_in_positions_is_rejected() {
        let state = state_with_positions(&[1, 3]);
        assert_eq!(
            validate(&state, None),
            Err(InvariantViolation::PositionConsistency(2))
        );
    }

    #[test]
    fn duplicate_numbers_rejected() {
        let mut state = state_with_positions(&[1]);
        let dup = state.car_positions[0].clone();
        state.car_positions.push(dup);
        assert!(matches!(
            validate(&state, None),
            Err(InvariantViolation::DuplicateCarNumber(_))
        ));
    }

    #[test]
    fn pit_stop_count_decrease_is_rejected() {
        let mut prior = state_with_positions(&[1]);
        prior.car_positions[0].pit_stop_count = 2;
        let mut current = prior.clone();
        current.car_positions[0].pit_stop_count = 1;
        assert_eq!(
            validate(&current, Some(&prior)),
            Err(InvariantViolation::PitStopCountDecreased("0".to_owned()))
        );
    }

    #[test]
    fn pit_stop_count_increase_is_valid() {
        let mut prior = state_with_positions(&[1]);
        prior.car_positions[0].pit_stop_count = 1;
        let mut current = prior.clone();
        current.car_positions[0].pit_stop_count = 2;
        assert!(validate(&current, Some(&prior)).is_ok());
    }
}
