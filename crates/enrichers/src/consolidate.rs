//! The update consolidator: merges one pipeline pass's per-car patches,
//! trims anything that nets out to no change, and hands the result to the
//! publisher.

use session_state::CarPositionPatch;

pub fn consolidate(patches: Vec<CarPositionPatch>) -> Vec<CarPositionPatch> {
    session_state::consolidate_car_patches(patches)
}
