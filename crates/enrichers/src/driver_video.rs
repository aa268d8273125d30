//! Attaches driver identity and in-car video status from external
//! telemetry caches. The lookups themselves are provided by the caller
//! (typically backed by the stream-bus KV cache) through these traits, so
//! this crate stays free of any bus or persistence dependency.

use session_state::{CarPositionPatch, InCarVideoStatus, SessionState};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverInfo {
    pub name: Option<String>,
    pub id: Option<String>,
}

pub trait DriverLookup {
    fn lookup(&self, event_id: i64, number: &str, transponder_id: Option<&str>) -> Option<DriverInfo>;
}

pub trait VideoLookup {
    fn lookup(&self, event_id: i64, number: &str, transponder_id: Option<&str>) -> Option<InCarVideoStatus>;
}

fn apply_one(
    state: &mut SessionState,
    number: &str,
    driver: &impl DriverLookup,
    video: &impl VideoLookup,
) -> Option<CarPositionPatch> {
    let event_id = state.event_id;
    let car = state.car_mut(number)?;
    let prior = car.clone();
    let transponder = car.transponder_id.clone();

    if let Some(info) = driver.lookup(event_id, number, transponder.as_deref()) {
        car.driver_name = info.name;
        car.driver_id = info.id;
    }
    if let Some(status) = video.lookup(event_id, number, transponder.as_deref()) {
        car.in_car_video = Some(status);
    }

    session_state::diff_car(&prior, car)
}

/// On-demand refresh for a single car, triggered when its patch changed.
pub fn refresh_car(
    state: &mut SessionState,
    number: &str,
    driver: &impl DriverLookup,
    video: &impl VideoLookup,
) -> Option<CarPositionPatch> {
    apply_one(state, number, driver, video)
}

/// Full refresh across every car, run on the periodic 60-message tick.
pub fn refresh_all(
    state: &mut SessionState,
    driver: &impl DriverLookup,
    video: &impl VideoLookup,
) -> Vec<CarPositionPatch> {
    let numbers: Vec<String> = state.car_positions.iter().map(|c| c.number.clone()).collect();
    numbers
        .into_iter()
        .filter_map(|n| apply_one(state, &n, driver, video))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_state::{CarPosition, SessionState};

    struct FixedDriver(DriverInfo);
    impl DriverLookup for FixedDriver {
        fn lookup(&self, _event_id: i64, _number: &str, _transponder_id: Option<&str>) -> Option<DriverInfo> {
            Some(self.0.clone())
        }
    }
    struct NoVideo;
    impl VideoLookup for NoVideo {
        fn lookup(&self, _event_id: i64, _number: &str, _transponder_id: Option<&str>) -> Option<InCarVideoStatus> {
            None
        }
    }

    #[test]
    fn refresh_attaches_driver_name() {
        let mut state = SessionState::new(1, 10, Utc::now());
        state.car_positions.push(CarPosition::new(1, 10, "42", "GT3"));
        let driver = FixedDriver(DriverInfo {
            name: Some("A. Driver".to_owned()),
            id: Some("d-1".to_owned()),
        });
        let patches = refresh_all(&mut state, &driver, &NoVideo);
        assert_eq!(patches.len(), 1);
        assert_eq!(state.car("42").unwrap().driver_name, Some("A. Driver".to_owned()));
    }
}
