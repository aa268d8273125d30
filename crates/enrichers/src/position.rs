//! Recomputes rank-derived fields (class position, gaps, differences,
//! positions-gained) over the full car list. Runs first in the enricher
//! chain since pit/driver/video enrichment can depend on a car's current
//! rank.

use session_state::{CarPosition, SessionState, INVALID};

fn order_by_overall_position(cars: &[CarPosition]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..cars.len()).collect();
    idx.sort_by_key(|&i| {
        let pos = cars[i].overall_position;
        if pos == 0 {
            (1, i32::MAX)
        } else {
            (0, pos)
        }
    });
    idx
}

fn format_time_ms(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    let whole = ms % 1000;
    let total_secs = ms / 1000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    if mins > 0 {
        format!("{sign}{mins}:{secs:02}.{whole:03}")
    } else {
        format!("{sign}{secs}.{whole:03}")
    }
}

fn format_lap_count(laps: i32) -> String {
    if laps == 1 {
        "1 lap".to_owned()
    } else {
        format!("{laps} laps")
    }
}

fn gap_to(ahead: &CarPosition, behind: &CarPosition) -> String {
    let lap_diff = ahead.last_lap_completed - behind.last_lap_completed;
    if lap_diff >= 1 {
        return format_lap_count(lap_diff);
    }
    match (ahead.total_time_ms, behind.total_time_ms) {
        (Some(a), Some(b)) if b >= a => format_time_ms(b - a),
        _ => String::new(),
    }
}

fn positions_gained(starting: i32, current: i32, field_size: i32) -> i32 {
    if starting == 0 || current == 0 || field_size == 0 {
        return INVALID;
    }
    let gained = starting - current;
    if gained.unsigned_abs() as i32 >= field_size {
        INVALID
    } else {
        gained
    }
}

fn mark_most_positions_gained(gains: &[(usize, i32)]) -> Option<usize> {
    let max = gains.iter().filter(|(_, g)| *g > 0).map(|(_, g)| *g).max()?;
    let holders: Vec<usize> = gains.iter().filter(|(_, g)| *g == max).map(|(i, _)| *i).collect();
    (holders.len() == 1).then(|| holders[0])
}

/// Picks the single car to flag as holding the minimum `best_time_ms` among
/// `times`, breaking ties in favor of the lowest index so at most one car is
/// ever flagged.
fn mark_best_time(times: &[(usize, Option<i64>)]) -> Option<usize> {
    times
        .iter()
        .filter_map(|(i, t)| t.map(|t| (*i, t)))
        .min_by_key(|&(i, t)| (t, i))
        .map(|(i, _)| i)
}

/// Recomputes `class_position`, gaps/differences, best-time flags, and
/// positions-gained for every car in `state`, mutating in place.
pub fn enrich(state: &mut SessionState) {
    let total_cars = state.total_cars() as i32;
    let order = order_by_overall_position(&state.car_positions);

    if let Some(&leader_idx) = order.first() {
        if state.car_positions[leader_idx].overall_position != 0 {
            let leader = state.car_positions[leader_idx].clone();
            for (rank, &idx) in order.iter().enumerate() {
                if state.car_positions[idx].overall_position == 0 {
                    state.car_positions[idx].overall_gap = String::new();
                    state.car_positions[idx].overall_difference = String::new();
                    continue;
                }
                let ahead = if rank == 0 {
                    None
                } else {
                    Some(state.car_positions[order[rank - 1]].clone())
                };
                let car = &mut state.car_positions[idx];
                car.overall_difference = gap_to(&leader, car);
                car.overall_gap = match ahead {
                    Some(ref a) => gap_to(a, car),
                    None => String::new(),
                };
            }
        }
    }

    let overall_times: Vec<(usize, Option<i64>)> =
        state.car_positions.iter().enumerate().map(|(i, c)| (i, c.best_time_ms)).collect();
    let overall_best_holder = mark_best_time(&overall_times);
    for (idx, car) in state.car_positions.iter_mut().enumerate() {
        car.is_best_time = Some(idx) == overall_best_holder;
    }

    let classes: std::collections::BTreeSet<String> =
        state.car_positions.iter().map(|c| c.class.clone()).collect();
    for class in classes {
        let cars_in_class = state.cars_in_class(&class) as i32;
        let class_order: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| state.car_positions[i].class == class)
            .collect();

        for (rank, &idx) in class_order.iter().enumerate() {
            if state.car_positions[idx].overall_position != 0 {
                state.car_positions[idx].class_position = rank as i32 + 1;
            } else {
                state.car_positions[idx].class_position = 0;
            }
        }

        if let Some(&leader_idx) = class_order.first() {
            if state.car_positions[leader_idx].overall_position != 0 {
                let leader = state.car_positions[leader_idx].clone();
                for (rank, &idx) in class_order.iter().enumerate() {
                    if state.car_positions[idx].overall_position == 0 {
                        state.car_positions[idx].in_class_gap = String::new();
                        state.car_positions[idx].in_class_difference = String::new();
                        continue;
                    }
                    let ahead = if rank == 0 {
                        None
                    } else {
                        Some(state.car_positions[class_order[rank - 1]].clone())
                    };
                    let car = &mut state.car_positions[idx];
                    car.in_class_difference = gap_to(&leader, car);
                    car.in_class_gap = match ahead {
                        Some(ref a) => gap_to(a, car),
                        None => String::new(),
                    };
                }
            }
        }

        let class_times: Vec<(usize, Option<i64>)> =
            class_order.iter().map(|&i| (i, state.car_positions[i].best_time_ms)).collect();
        let class_best_holder = mark_best_time(&class_times);
        for &idx in &class_order {
            let car = &mut state.car_positions[idx];
            car.is_best_time_class = Some(idx) == class_best_holder;
        }

        let class_gains: Vec<(usize, i32)> = class_order
            .iter()
            .map(|&i| {
                let car = &state.car_positions[i];
                (
                    i,
                    positions_gained(car.class_starting_position, car.class_position, cars_in_class),
                )
            })
            .collect();
        let class_winner = mark_most_positions_gained(&class_gains);
        for (idx, gained) in class_gains {
            let car = &mut state.car_positions[idx];
            car.in_class_positions_gained = gained;
            car.is_class_most_positions_gained = Some(idx) == class_winner;
        }
    }

    let overall_gains: Vec<(usize, i32)> = (0..state.car_positions.len())
        .map(|i| {
            let car = &state.car_positions[i];
            (
                i,
                positions_gained(car.overall_starting_position, car.overall_position, total_cars),
            )
        })
        .collect();
    let overall_winner = mark_most_positions_gained(&overall_gains);
    for (idx, gained) in overall_gains {
        let car = &mut state.car_positions[idx];
        car.overall_positions_gained = gained;
        car.is_overall_most_positions_gained = Some(idx) == overall_winner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::{CarPosition, SessionState};

    fn car(number: &str, class: &str, pos: i32, total_ms: i64) -> CarPosition {
        let mut c = CarPosition::new(1, 10, number, class);
        c.overall_position = pos;
        c.class_position = pos;
        c.total_time_ms = Some(total_ms);
        c.last_lap_completed = 10;
        c
    }

    #[test]
    fn gaps_are_seconds_formatted_against_leader_and_ahead() {
        let mut state = SessionState::new(1, 10, Utc::now());
        state.car_positions.push(car("1", "GT3", 1, 600_000));
        state.car_positions.push(car("2", "GT3", 2, 601_500));
        state.car_positions.push(car("3", "GT3", 3, 603_000));

        enrich(&mut state);

        assert_eq!(state.car("1").unwrap().overall_difference, "");
        assert_eq!(state.car("2").unwrap().overall_difference, "1.500");
        assert_eq!(state.car("3").unwrap().overall_difference, "3.000");
        assert_eq!(state.car("3").unwrap().overall_gap, "1.500");
    }

    #[test]
    fn lap_down_cars_report_lap_count_instead_of_time() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let mut leader = car("1", "GT3", 1, 600_000);
        leader.last_lap_completed = 11;
        let mut lapped = car("2", "GT3", 2, 590_000);
        lapped.last_lap_completed = 10;
        state.car_positions.push(leader);
        state.car_positions.push(lapped);

        enrich(&mut state);
        assert_eq!(state.car("2").unwrap().overall_difference, "1 lap");
    }

    #[test]
    fn multiple_laps_down_are_pluralized() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let mut leader = car("1", "GT3", 1, 600_000);
        leader.last_lap_completed = 14;
        let mut lapped = car("2", "GT3", 2, 590_000);
        lapped.last_lap_completed = 10;
        state.car_positions.push(leader);
        state.car_positions.push(lapped);

        enrich(&mut state);
        assert_eq!(state.car("2").unwrap().overall_difference, "4 laps");
    }

    #[test]
    fn positions_gained_is_invalid_when_starting_position_unknown() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let mut c = car("1", "GT3", 1, 600_000);
        c.overall_starting_position = 0;
        state.car_positions.push(c);

        enrich(&mut state);
        assert_eq!(state.car("1").unwrap().overall_positions_gained, INVALID);
    }

    #[test]
    fn unique_top_gainer_is_flagged() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let mut a = car("1", "GT3", 1, 600_000);
        a.overall_starting_position = 3;
        let mut b = car("2", "GT3", 2, 601_000);
        b.overall_starting_position = 2;
        let mut c = car("3", "GT3", 3, 602_000);
        c.overall_starting_position = 1;
        state.car_positions.push(a);
        state.car_positions.push(b);
        state.car_positions.push(c);

        enrich(&mut state);
        assert!(state.car("1").unwrap().is_overall_most_positions_gained);
        assert!(!state.car("2").unwrap().is_overall_most_positions_gained);
        assert!(!state.car("3").unwrap().is_overall_most_positions_gained);
    }

    #[test]
    fn cars_tied_at_the_minimum_best_time_flag_only_one() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let mut a = car("1", "GT3", 1, 600_000);
        a.best_time_ms = Some(30_000);
        let mut b = car("2", "GT3", 2, 601_000);
        b.best_time_ms = Some(30_000);
        state.car_positions.push(a);
        state.car_positions.push(b);

        enrich(&mut state);
        let flagged = [state.car("1").unwrap().is_best_time, state.car("2").unwrap().is_best_time];
        assert_eq!(flagged.iter().filter(|f| **f).count(), 1);
        assert!(state.car("1").unwrap().is_best_time);
    }
}
