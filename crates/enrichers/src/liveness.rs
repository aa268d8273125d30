//! The session liveness state machine: `PreLive -> Live -> Stale -> Ended`.

use chrono::{DateTime, Duration, Utc};
use session_state::{SessionLiveness, SessionState};

pub const DEFAULT_STALE_AFTER: Duration = Duration::minutes(2);

/// Call on every inbound update tagged with this session's id.
pub fn on_update(state: &mut SessionState, now: DateTime<Utc>) {
    state.liveness = match state.liveness {
        SessionLiveness::PreLive | SessionLiveness::Stale => SessionLiveness::Live,
        other => other,
    };
    state.last_updated = now;
}

/// Call periodically (independent of message arrival) to detect staleness.
pub fn check_staleness(state: &mut SessionState, now: DateTime<Utc>, stale_after: Duration) {
    if state.liveness == SessionLiveness::Live && now - state.last_updated >= stale_after {
        state.liveness = SessionLiveness::Stale;
    }
}

/// Call when a new session id is registered for the same event, or on
/// explicit finalize.
pub fn finalize(state: &mut SessionState) {
    state.liveness = SessionLiveness::Ended;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn first_update_moves_pre_live_to_live() {
        let mut state = SessionState::new(1, 10, Utc::now());
        on_update(&mut state, Utc::now());
        assert_eq!(state.liveness, SessionLiveness::Live);
    }

    #[test]
    fn no_updates_for_stale_window_marks_stale_then_update_revives() {
        let mut state = SessionState::new(1, 10, Utc::now());
        on_update(&mut state, Utc::now());
        let later = Utc::now() + Duration::minutes(3);
        check_staleness(&mut state, later, DEFAULT_STALE_AFTER);
        assert_eq!(state.liveness, SessionLiveness::Stale);

        on_update(&mut state, later);
        assert_eq!(state.liveness, SessionLiveness::Live);
    }

    #[test]
    fn finalize_ends_the_session() {
        let mut state = SessionState::new(1, 10, Utc::now());
        on_update(&mut state, Utc::now());
        finalize(&mut state);
        assert_eq!(state.liveness, SessionLiveness::Ended);
    }
}
