//! Sparse patches over [`CarPosition`] and [`SessionState`], plus the pure
//! mapping functions the pipeline relies on: `diff`, `applyPatch`, and
//! consolidation of a batch of patches for the same car/session.

use crate::model::{
    Announcement, CarPosition, CarStatus, Entry, FlagDuration, FlagKind, InCarVideoStatus,
    SectionTime, SessionLiveness, SessionState, TrackSection,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sparse delta for one car, identified by `(session_id, number)`. Every
/// field beyond the identity pair is `None` unless it changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarPositionPatch {
    pub session_id: i64,
    pub number: String,

    pub transponder_id: Option<Option<String>>,
    pub class: Option<String>,

    pub best_time_ms: Option<Option<i64>>,
    pub best_lap: Option<Option<i32>>,
    pub last_lap_time_ms: Option<Option<i64>>,
    pub last_lap_completed: Option<i32>,
    pub total_time_ms: Option<Option<i64>>,
    pub projected_lap_time_ms: Option<Option<i64>>,
    pub lap_start_time: Option<Option<chrono::DateTime<chrono::Utc>>>,

    pub overall_position: Option<i32>,
    pub class_position: Option<i32>,
    pub overall_starting_position: Option<i32>,
    pub class_starting_position: Option<i32>,
    pub overall_gap: Option<String>,
    pub overall_difference: Option<String>,
    pub in_class_gap: Option<String>,
    pub in_class_difference: Option<String>,
    pub overall_positions_gained: Option<i32>,
    pub in_class_positions_gained: Option<i32>,
    pub is_best_time: Option<bool>,
    pub is_best_time_class: Option<bool>,
    pub is_overall_most_positions_gained: Option<bool>,
    pub is_class_most_positions_gained: Option<bool>,

    pub in_pit: Option<bool>,
    pub entered_pit: Option<bool>,
    pub exited_pit: Option<bool>,
    pub pit_start_finish: Option<bool>,
    pub lap_included_pit: Option<bool>,
    pub pit_stop_count: Option<i32>,
    pub last_lap_pitted: Option<Option<i32>>,

    pub track_flag: Option<FlagKind>,
    pub local_flag: Option<FlagKind>,
    pub lap_had_local_flag: Option<bool>,

    pub penalty_laps: Option<i32>,
    pub penalty_warnings: Option<i32>,
    pub black_flags: Option<i32>,

    pub driver_name: Option<Option<String>>,
    pub driver_id: Option<Option<String>>,

    pub lat: Option<Option<f64>>,
    pub lon: Option<Option<f64>>,
    pub last_loop_name: Option<Option<String>>,

    pub completed_sections: Option<Vec<SectionTime>>,
    pub in_car_video: Option<Option<InCarVideoStatus>>,

    pub current_status: Option<CarStatus>,
    pub is_stale: Option<bool>,
    pub impact_warning: Option<bool>,
}

impl CarPositionPatch {
    pub fn identity(session_id: i64, number: impl Into<String>) -> Self {
        Self {
            session_id,
            number: number.into(),
            ..Default::default()
        }
    }

    /// True when every field beyond the identity pair is unset.
    pub fn is_empty(&self) -> bool {
        *self == Self::identity(self.session_id, self.number.clone())
    }
}

/// A sparse delta for session-level fields (timing, flags, aggregates).
/// Car-level changes travel as [`CarPositionPatch`] instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatePatch {
    pub session_id: i64,

    pub liveness: Option<SessionLiveness>,
    pub laps_to_go: Option<Option<i32>>,
    pub time_to_go_ms: Option<Option<i64>>,
    pub running_race_time_ms: Option<Option<i64>>,
    pub local_time_of_day: Option<Option<String>>,

    pub current_flag: Option<FlagKind>,
    pub flag_durations: Option<Vec<FlagDuration>>,

    pub green_ms: Option<i64>,
    pub yellow_ms: Option<i64>,
    pub red_ms: Option<i64>,
    pub num_yellows: Option<i32>,
    pub average_race_speed: Option<Option<f64>>,
    pub lead_changes: Option<i32>,

    pub entries: Option<Vec<Entry>>,
    pub track_sections: Option<Vec<TrackSection>>,
    pub class_colors: Option<HashMap<String, String>>,
    pub announcements: Option<Vec<Announcement>>,
}

impl SessionStatePatch {
    pub fn identity(session_id: i64) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::identity(self.session_id)
    }
}

macro_rules! diff_field {
    ($patch:expr, $prior:expr, $new:expr, $field:ident) => {
        if $prior.$field != $new.$field {
            $patch.$field = Some($new.$field.clone());
        }
    };
}

/// Computes the sparse delta between two car snapshots for the same
/// `(session_id, number)`. Returns `None` when nothing changed.
pub fn diff_car(prior: &CarPosition, new: &CarPosition) -> Option<CarPositionPatch> {
    debug_assert_eq!(prior.session_id, new.session_id);
    debug_assert_eq!(prior.number, new.number);

    let mut patch = CarPositionPatch::identity(new.session_id, new.number.clone());

    diff_field!(patch, prior, new, transponder_id);
    diff_field!(patch, prior, new, class);
    diff_field!(patch, prior, new, best_time_ms);
    diff_field!(patch, prior, new, best_lap);
    diff_field!(patch, prior, new, last_lap_time_ms);
    diff_field!(patch, prior, new, last_lap_completed);
    diff_field!(patch, prior, new, total_time_ms);
    diff_field!(patch, prior, new, projected_lap_time_ms);
    diff_field!(patch, prior, new, lap_start_time);
    diff_field!(patch, prior, new, overall_position);
    diff_field!(patch, prior, new, class_position);
    diff_field!(patch, prior, new, overall_starting_position);
    diff_field!(patch, prior, new, class_starting_position);
    diff_field!(patch, prior, new, overall_gap);
    diff_field!(patch, prior, new, overall_difference);
    diff_field!(patch, prior, new, in_class_gap);
    diff_field!(patch, prior, new, in_class_difference);
    diff_field!(patch, prior, new, overall_positions_gained);
    diff_field!(patch, prior, new, in_class_positions_gained);
    diff_field!(patch, prior, new, is_best_time);
    diff_field!(patch, prior, new, is_best_time_class);
    diff_field!(patch, prior, new, is_overall_most_positions_gained);
    diff_field!(patch, prior, new, is_class_most_positions_gained);
    diff_field!(patch, prior, new, in_pit);
    diff_field!(patch, prior, new, entered_pit);
    diff_field!(patch, prior, new, exited_pit);
    diff_field!(patch, prior, new, pit_start_finish);
    diff_field!(patch, prior, new, lap_included_pit);
    diff_field!(patch, prior, new, pit_stop_count);
    diff_field!(patch, prior, new, last_lap_pitted);
    diff_field!(patch, prior, new, track_flag);
    diff_field!(patch, prior, new, local_flag);
    diff_field!(patch, prior, new, lap_had_local_flag);
    diff_field!(patch, prior, new, penalty_laps);
    diff_field!(patch, prior, new, penalty_warnings);
    diff_field!(patch, prior, new, black_flags);
    diff_field!(patch, prior, new, driver_name);
    diff_field!(patch, prior, new, driver_id);
    diff_field!(patch, prior, new, lat);
    diff_field!(patch, prior, new, lon);
    diff_field!(patch, prior, new, last_loop_name);
    diff_field!(patch, prior, new, completed_sections);
    diff_field!(patch, prior, new, in_car_video);
    diff_field!(patch, prior, new, current_status);
    diff_field!(patch, prior, new, is_stale);
    diff_field!(patch, prior, new, impact_warning);

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

/// Applies a car patch to its target snapshot in place.
/// `apply_car_patch(diff_car(a, b), a) == b` for any two snapshots `a`/`b`.
pub fn apply_car_patch(patch: &CarPositionPatch, car: &mut CarPosition) {
    macro_rules! apply {
        ($field:ident) => {
            if let Some(v) = patch.$field.clone() {
                car.$field = v;
            }
        };
    }
    apply!(transponder_id);
    apply!(class);
    apply!(best_time_ms);
    apply!(best_lap);
    apply!(last_lap_time_ms);
    apply!(last_lap_completed);
    apply!(total_time_ms);
    apply!(projected_lap_time_ms);
    apply!(lap_start_time);
    apply!(overall_position);
    apply!(class_position);
    apply!(overall_starting_position);
    apply!(class_starting_position);
    apply!(overall_gap);
    apply!(overall_difference);
    apply!(in_class_gap);
    apply!(in_class_difference);
    apply!(overall_positions_gained);
    apply!(in_class_positions_gained);
    apply!(is_best_time);
    apply!(is_best_time_class);
    apply!(is_overall_most_positions_gained);
    apply!(is_class_most_positions_gained);
    apply!(in_pit);
    apply!(entered_pit);
    apply!(exited_pit);
    apply!(pit_start_finish);
    apply!(lap_included_pit);
    apply!(pit_stop_count);
    apply!(last_lap_pitted);
    apply!(track_flag);
    apply!(local_flag);
    apply!(lap_had_local_flag);
    apply!(penalty_laps);
    apply!(penalty_warnings);
    apply!(black_flags);
    apply!(driver_name);
    apply!(driver_id);
    apply!(lat);
    apply!(lon);
    apply!(last_loop_name);
    apply!(completed_sections);
    apply!(in_car_video);
    apply!(current_status);
    apply!(is_stale);
    apply!(impact_warning);
}

pub fn diff_session(prior: &SessionState, new: &SessionState) -> Option<SessionStatePatch> {
    debug_assert_eq!(prior.session_id, new.session_id);
    let mut patch = SessionStatePatch::identity(new.session_id);

    diff_field!(patch, prior, new, liveness);
    diff_field!(patch, prior, new, laps_to_go);
    diff_field!(patch, prior, new, time_to_go_ms);
    diff_field!(patch, prior, new, running_race_time_ms);
    diff_field!(patch, prior, new, local_time_of_day);
    diff_field!(patch, prior, new, current_flag);
    diff_field!(patch, prior, new, flag_durations);
    diff_field!(patch, prior, new, green_ms);
    diff_field!(patch, prior, new, yellow_ms);
    diff_field!(patch, prior, new, red_ms);
    diff_field!(patch, prior, new, num_yellows);
    diff_field!(patch, prior, new, average_race_speed);
    diff_field!(patch, prior, new, lead_changes);
    diff_field!(patch, prior, new, entries);
    diff_field!(patch, prior, new, track_sections);
    diff_field!(patch, prior, new, class_colors);
    diff_field!(patch, prior, new, announcements);

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

pub fn apply_session_patch(patch: &SessionStatePatch, state: &mut SessionState) {
    macro_rules! apply {
        ($field:ident) => {
            if let Some(v) = patch.$field.clone() {
                state.$field = v;
            }
        };
    }
    apply!(liveness);
    apply!(laps_to_go);
    apply!(time_to_go_ms);
    apply!(running_race_time_ms);
    apply!(local_time_of_day);
    apply!(current_flag);
    apply!(flag_durations);
    apply!(green_ms);
    apply!(yellow_ms);
    apply!(red_ms);
    apply!(num_yellows);
    apply!(average_race_speed);
    apply!(lead_changes);
    apply!(entries);
    apply!(track_sections);
    apply!(class_colors);
    apply!(announcements);
}

/// Merges a batch of car patches emitted during one pipeline pass.
///
/// Patches for the same `(session_id, number)` are folded in order, with
/// later non-null fields overwriting earlier ones; empty results are
/// dropped. Order of distinct cars is preserved by first appearance.
pub fn consolidate_car_patches(patches: Vec<CarPositionPatch>) -> Vec<CarPositionPatch> {
    let mut order: Vec<(i64, String)> = Vec::new();
    let mut merged: HashMap<(i64, String), CarPositionPatch> = HashMap::new();

    for patch in patches {
        let key = (patch.session_id, patch.number.clone());
        match merged.get_mut(&key) {
            Some(existing) => merge_car_patch_into(existing, &patch),
            None => {
                order.push(key.clone());
                merged.insert(key, patch);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .filter(|p| !p.is_empty())
        .collect()
}

fn merge_car_patch_into(base: &mut CarPositionPatch, newer: &CarPositionPatch) {
    macro_rules! merge {
        ($field:ident) => {
            if newer.$field.is_some() {
                base.$field = newer.$field.clone();
            }
        };
    }
    merge!(transponder_id);
    merge!(class);
    merge!(best_time_ms);
    merge!(best_lap);
    merge!(last_lap_time_ms);
    merge!(last_lap_completed);
    merge!(total_time_ms);
    merge!(projected_lap_time_ms);
    merge!(lap_start_time);
    merge!(overall_position);
    merge!(class_position);
    merge!(overall_starting_position);
    merge!(class_starting_position);
    merge!(overall_gap);
    merge!(overall_difference);
    merge!(in_class_gap);
    merge!(in_class_difference);
    merge!(overall_positions_gained);
    merge!(in_class_positions_gained);
    merge!(is_best_time);
    merge!(is_best_time_class);
    merge!(is_overall_most_positions_gained);
    merge!(is_class_most_positions_gained);
    merge!(in_pit);
    merge!(entered_pit);
    merge!(exited_pit);
    merge!(pit_start_finish);
    merge!(lap_included_pit);
    merge!(pit_stop_count);
    merge!(last_lap_pitted);
    merge!(track_flag);
    merge!(local_flag);
    merge!(lap_had_local_flag);
    merge!(penalty_laps);
    merge!(penalty_warnings);
    merge!(black_flags);
    merge!(driver_name);
    merge!(driver_id);
    merge!(lat);
    merge!(lon);
    merge!(last_loop_name);
    merge!(completed_sections);
    merge!(in_car_video);
    merge!(current_status);
    merge!(is_stale);
    merge!(impact_warning);
}

/// Applies a batch of car patches to a session's car list, inserting new
/// cars as needed (identified only by number — class defaults to empty and
/// is expected to arrive in the same patch).
pub fn apply_car_patches(state: &mut SessionState, patches: &[CarPositionPatch]) {
    for patch in patches {
        let car = state.car_or_insert(&patch.number, "");
        apply_car_patch(patch, car);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CarPosition;

    fn base_car() -> CarPosition {
        CarPosition::new(1, 10, "42", "GT3")
    }

    #[test]
    fn diff_then_apply_round_trips() {
        let prior = base_car();
        let mut new = prior.clone();
        new.overall_position = 3;
        new.best_time_ms = Some(61234);
        new.driver_name = Some("A. Driver".to_owned());

        let patch = diff_car(&prior, &new).expect("should have changes");
        let mut replayed = prior.clone();
        apply_car_patch(&patch, &mut replayed);
        assert_eq!(replayed, new);
    }

    #[test]
    fn diff_with_no_changes_is_none() {
        let prior = base_car();
        let new = prior.clone();
        assert!(diff_car(&prior, &new).is_none());
    }

    #[test]
    fn consolidate_prefers_later_non_null_fields_and_drops_empties() {
        let mut first = CarPositionPatch::identity(10, "42");
        first.overall_position = Some(2);
        first.overall_gap = Some("1.000".to_owned());

        let mut second = CarPositionPatch::identity(10, "42");
        second.overall_position = Some(1);

        let empty = CarPositionPatch::identity(10, "7");

        let merged = consolidate_car_patches(vec![first, second, empty]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].overall_position, Some(1));
        assert_eq!(merged[0].overall_gap, Some("1.000".to_owned()));
    }
}
