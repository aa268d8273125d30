//! Secondary enrichment passes that run, in fixed order, after a primary
//! decoder produces car patches: position, pit re-sync, driver, video,
//! control-log penalties. Flag handling and liveness tracking run off the
//! same snapshot but are triggered by their own message types rather than
//! by car-patch production.

pub mod consolidate;
pub mod control_log;
pub mod driver_video;
pub mod flags;
pub mod lap;
pub mod liveness;
pub mod pit;
pub mod position;

pub use consolidate::consolidate;
pub use control_log::{apply_entry as apply_control_log_entry, ControlLogEntry};
pub use driver_video::{refresh_all as refresh_driver_video, refresh_car as refresh_driver_video_for_car, DriverInfo, DriverLookup, VideoLookup};
pub use flags::apply_flag_change;
pub use lap::{detect as detect_lap_completion, LapCompletionEvent};
pub use liveness::{check_staleness, finalize as finalize_session, on_update as mark_session_updated, DEFAULT_STALE_AFTER};
pub use pit::resync as resync_pit_state;
pub use position::enrich as enrich_positions;
