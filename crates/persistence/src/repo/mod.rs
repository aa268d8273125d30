pub mod car_lap_logs;
pub mod clients;
pub mod competitor_metadata;
pub mod events;
pub mod flag_log;
pub mod session_results;
pub mod sessions;
pub mod x2;
