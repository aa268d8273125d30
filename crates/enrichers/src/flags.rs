//! Closes/opens [`FlagDuration`] entries as new flag state arrives and
//! keeps `current_flag` and the time-in-flag aggregates in sync.

use session_state::{FlagDuration, FlagKind, SessionState};

/// Applies a flag transition: closes any currently-open duration at `now`,
/// opens a new one for `flag`, and updates `current_flag`. A no-op when
/// `flag` matches the already-open duration.
pub fn apply_flag_change(state: &mut SessionState, flag: FlagKind, now: chrono::DateTime<chrono::Utc>) {
    if state.current_flag == flag && state.flag_durations.iter().any(|d| d.end_time.is_none() && d.flag == flag) {
        return;
    }
    if let Some(open) = state.flag_durations.iter_mut().find(|d| d.end_time.is_none()) {
        open.end_time = Some(now);
        let elapsed = (now - open.start_time).num_milliseconds().max(0);
        let open_flag = open.flag;
        accumulate(state, open_flag, elapsed);
    }
    state.flag_durations.push(FlagDuration {
        flag,
        start_time: now,
        end_time: None,
    });
    if flag == FlagKind::Yellow {
        state.num_yellows += 1;
    }
    state.current_flag = flag;
}

fn accumulate(state: &mut SessionState, flag: FlagKind, elapsed_ms: i64) {
    match flag {
        FlagKind::Green => state.green_ms += elapsed_ms,
        FlagKind::Yellow => state.yellow_ms += elapsed_ms,
        FlagKind::Red => state.red_ms += elapsed_ms,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn opening_a_new_flag_closes_the_prior_one() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let t0 = Utc::now();
        apply_flag_change(&mut state, FlagKind::Green, t0);
        let t1 = t0 + Duration::seconds(30);
        apply_flag_change(&mut state, FlagKind::Yellow, t1);

        assert_eq!(state.flag_durations.len(), 2);
        assert_eq!(state.flag_durations[0].end_time, Some(t1));
        assert_eq!(state.flag_durations[1].end_time, None);
        assert_eq!(state.current_flag, FlagKind::Yellow);
    }

    #[test]
    fn repeating_the_same_open_flag_is_a_no_op() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let t0 = Utc::now();
        apply_flag_change(&mut state, FlagKind::Green, t0);
        apply_flag_change(&mut state, FlagKind::Green, t0 + Duration::seconds(5));
        assert_eq!(state.flag_durations.len(), 1);
    }

    #[test]
    fn closing_a_flag_accumulates_its_elapsed_time() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let t0 = Utc::now();
        apply_flag_change(&mut state, FlagKind::Green, t0);
        let t1 = t0 + Duration::seconds(10);
        apply_flag_change(&mut state, FlagKind::Yellow, t1);
        let t2 = t1 + Duration::seconds(20);
        apply_flag_change(&mut state, FlagKind::Green, t2);

        assert_eq!(state.green_ms, 10_000);
        assert_eq!(state.yellow_ms, 20_000);
        assert_eq!(state.red_ms, 0);
    }

    #[test]
    fn opening_a_yellow_flag_bumps_num_yellows() {
        let mut state = SessionState::new(1, 10, Utc::now());
        let t0 = Utc::now();
        apply_flag_change(&mut state, FlagKind::Green, t0);
        apply_flag_change(&mut state, FlagKind::Yellow, t0 + Duration::seconds(5));
        apply_flag_change(&mut state, FlagKind::Green, t0 + Duration::seconds(10));
        apply_flag_change(&mut state, FlagKind::Yellow, t0 + Duration::seconds(15));

        assert_eq!(state.num_yellows, 2);
    }
}
