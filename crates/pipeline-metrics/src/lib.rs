//! Thin wrappers around the `metrics` facade so callers never construct
//! metric names by hand. Install a recorder once at startup with
//! [`install_exporter`]; every function below is then a cheap record call.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

pub fn install_exporter(bind_addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(bind_addr)
        .install()
}

pub fn record_pipeline_message_processed(event_id: i64, elapsed: Duration) {
    metrics::histogram!("pipeline_message_processing_seconds", "event_id" => event_id.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn set_pipeline_health(event_id: i64, healthy: bool) {
    metrics::gauge!("pipeline_health", "event_id" => event_id.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn set_status_connections(event_id: i64, count: u64) {
    metrics::gauge!("status_connections", "event_id" => event_id.to_string()).set(count as f64);
}

pub fn set_relay_connections(event_id: i64, count: u64) {
    metrics::gauge!("relay_connections", "event_id" => event_id.to_string()).set(count as f64);
}

pub fn set_total_subscriber_connections(count: u64) {
    metrics::gauge!("subscriber_connections_total").set(count as f64);
}

pub fn set_in_car_connections(count: u64) {
    metrics::gauge!("in_car_connections_total").set(count as f64);
}

pub fn increment_bus_read_error(stream: &str) {
    metrics::counter!("bus_read_errors_total", "stream" => stream.to_owned()).increment(1);
}

pub fn increment_decode_error(feed: &str) {
    metrics::counter!("decode_errors_total", "feed" => feed.to_owned()).increment(1);
}
