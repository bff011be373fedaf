//! Liveness endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Open notification streams
    pub websocket_clients: usize,
    /// Whether `/events` expects the bearer secret
    pub webhook_auth: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        websocket_clients: state.conn_manager.connection_count(),
        webhook_auth: state.config.auth_secret.is_some(),
    })
}
