use std::env;

/// Configuration for one per-event pipeline instance. `event_id` pins this
/// process to exactly one event; `job_name` is the addressable endpoint
/// string this process advertises through the endpoint registry.
pub struct EngineConfig {
    pub event_id: i64,
    pub job_name: String,
    pub database_url: String,
    pub redis_url: String,
    pub bind_addr: String,
    pub metrics_addr: std::net::SocketAddr,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let event_id: i64 = env::var("event_id")
            .or_else(|_| env::var("EVENT_ID"))
            .expect("event_id must be set")
            .parse()
            .expect("event_id must be an integer");

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8083".to_owned());
        let job_name = env::var("job_name")
            .or_else(|_| env::var("JOB_NAME"))
            .unwrap_or_else(|_| bind_addr.clone());

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let redis_url = env::var("REDIS_URL").expect("REDIS_URL must be set");
        let metrics_addr = env::var("METRICS_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9093".to_owned())
            .parse()
            .expect("invalid METRICS_ADDR");

        Self { event_id, job_name, database_url, redis_url, bind_addr, metrics_addr }
    }
}
