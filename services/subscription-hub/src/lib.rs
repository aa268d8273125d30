pub mod auth;
pub mod state;
pub mod ws_subscriber;

pub use state::AppState;

use axum::{routing::get, Router};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/subscribe", get(ws_subscriber::ws_subscriber_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
