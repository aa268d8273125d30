pub mod csv;
pub mod errors;
pub mod multiloop;
pub mod passing;
pub mod rmonitor;

pub use errors::{MultiloopError, RMonitorError};
pub use multiloop::{MultiloopDecoder, MultiloopEffect, MultiloopRecord};
pub use passing::{apply_loop, apply_passing, Loop, LoopEffect, Passing, PassingEffect};
pub use rmonitor::{apply as apply_rmonitor, decode_line as decode_rmonitor_line, RMonitorEffect, RMonitorRecord};
