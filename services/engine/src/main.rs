use std::env;

use axum::{routing::get, Router};
use engine::config::EngineConfig;
use engine::state::EventEngine;
use engine::{pipeline, publisher, registry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = EngineConfig::from_env();

    info!(event_id = config.event_id, "connecting to database...");
    let pool = persistence::create_pool(&config.database_url).await;
    persistence::run_migrations(&pool).await;

    info!("connecting to stream bus...");
    let bus = stream_bus::StreamBus::connect(&config.redis_url)
        .await
        .expect("failed to connect to stream bus");

    pipeline_metrics::install_exporter(config.metrics_addr).expect("failed to install metrics exporter");

    let bind_addr = config.bind_addr.clone();
    let engine = EventEngine::new(&config, pool, bus);

    registry::register_once(&engine).await;
    tokio::spawn(registry::run_refresh_loop(engine.clone()));
    tokio::spawn(publisher::run_full_refresh_loop(engine.clone()));
    tokio::spawn(pipeline::run(engine.clone()));

    let router = Router::new().route("/healthz", get(healthz)).route("/readyz", get(healthz));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, event_id = engine.event_id, "engine listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("engine shut down gracefully");
}

async fn healthz() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
