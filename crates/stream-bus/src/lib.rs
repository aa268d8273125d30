pub mod error;
pub mod keys;
pub mod manager;

pub use error::BusError;
pub use manager::{StreamBus, StreamEntry};
