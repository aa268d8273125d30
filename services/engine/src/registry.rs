//! C9: advertises this process's addressable endpoint so other services
//! (e.g. a REST API proxying a current-state fetch) can resolve the
//! owner of a live event.

use std::sync::Arc;
use std::time::Duration;

use stream_bus::keys;
use tracing::warn;

use crate::state::EventEngine;

const ENDPOINT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn register_once(engine: &Arc<EventEngine>) {
    let key = keys::event_service_endpoint(engine.event_id);
    if let Err(e) = engine.bus.set_ex(&key, &engine.job_name, ENDPOINT_TTL_SECS).await {
        warn!(error = %e, "failed to register event service endpoint");
    }
}

/// Refreshes the endpoint TTL periodically so a reconnect (or a bus
/// restart that drops the key early) never leaves it to expire while this
/// process is still the owner.
pub async fn run_refresh_loop(engine: Arc<EventEngine>) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    loop {
        interval.tick().await;
        register_once(&engine).await;
    }
}
