//! Session state & patches: the authoritative per-session data model.
//!
//! Owns the [`SessionState`] data model, the single-writer lock around it
//! ([`SessionStateHandle`]), and the pure mapping functions used by the
//! pipeline: `diff`, `apply`, and patch consolidation.

pub mod invariant;
pub mod lock;
pub mod model;
pub mod patch;

pub use invariant::{validate, InvariantViolation};
pub use lock::SessionStateHandle;
pub use model::{
    Announcement, CarPosition, CarStatus, Entry, FlagDuration, FlagKind, InCarVideoStatus,
    SectionTime, SessionLiveness, SessionState, TrackSection, INVALID,
};
pub use patch::{
    apply_car_patch, apply_car_patches, apply_session_patch, consolidate_car_patches, diff_car,
    diff_session, CarPositionPatch, SessionStatePatch,
};
